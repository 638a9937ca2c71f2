//! Morale dynamics and the thresholds that break a combatant.

use crate::components::*;
use crate::config::SimConfig;
use crate::entity::{Combatants, EntityId};
use crate::links::WorldLinks;
use crate::math::planar;
use crate::spatial::SpatialGrid;
use crate::stigmergy::Channel;
use crate::systems::suppression::{is_pinned, is_suppressed};
use crate::systems::time::DeltaTime;
use bevy_ecs::prelude::*;
use glam::Vec3;
use tracing::trace;

/// Radius within which squad-mates lend cohesion.
const COHESION_RADIUS: f32 = 15.0;
/// Cohesion bonus stops growing after this many mates.
const COHESION_CAP: usize = 4;
/// Radius within which a death shocks allies.
const SHOCK_RADIUS: f32 = 15.0;
/// Ambient fear/courage morale drift per second at full signal.
const AMBIENT_DRIFT: f32 = 0.05;

/// Break threshold after ambient fear and courage have moved it.
pub fn break_threshold(personality: Personality, fear: f32, courage: f32, config: &SimConfig) -> f32 {
    let bias = (fear.clamp(0.0, 1.0) - courage.clamp(0.0, 1.0)) * config.fear_threshold_shift;
    (personality.break_threshold() + bias).clamp(0.0, 0.95)
}

/// Morale shocks from a death: the killer gains, nearby allies of the
/// victim lose.
pub fn apply_death_shock(
    combatants: &mut Combatants,
    grid: &SpatialGrid,
    config: &SimConfig,
    victim: EntityId,
    killer: Option<EntityId>,
) {
    let vi = victim.index();
    let team = combatants.team[vi];
    let at = planar(combatants.position[vi]);
    let mut allies = Vec::new();
    grid.query_team_into(at, SHOCK_RADIUS, team, &mut allies);
    for ally in allies {
        if ally != victim && combatants.is_alive(ally) {
            let m = &mut combatants.morale[ally.index()];
            *m = (*m - config.morale_ally_death_shock).max(0.0);
        }
    }
    if let Some(k) = killer.filter(|k| combatants.is_alive(*k)) {
        let m = &mut combatants.morale[k.index()];
        *m = (*m + config.morale_kill_bonus).min(1.0);
    }
}

/// Morale hit for taking a wound.
#[inline]
pub fn apply_hit_shock(combatants: &mut Combatants, i: usize, config: &SimConfig) {
    let m = &mut combatants.morale[i];
    *m = (*m - config.morale_hit_shock).max(0.0);
}

pub fn morale_system(
    dt: Res<DeltaTime>,
    config: Res<SimConfig>,
    grid: Res<SpatialGrid>,
    links: Res<WorldLinks>,
    mut combatants: ResMut<Combatants>,
) {
    let delta = dt.0;
    let ids: Vec<EntityId> = combatants.alive_ids().collect();
    let mut mates = Vec::new();

    for id in ids {
        let i = id.index();
        let suppression = combatants.suppression[i];
        let health = combatants.health[i];
        let pos: Vec3 = combatants.position[i];
        let mut change = 0.0;

        if is_pinned(suppression) {
            change -= config.morale_pinned_penalty;
        } else if is_suppressed(suppression) {
            change -= config.morale_suppressed_penalty;
        }

        if health < 0.75 {
            change -= (1.0 - health) * config.morale_wound_penalty;
        }

        let fear = links.sample(pos, Channel::Fear).clamp(0.0, 1.0);
        let courage = links.sample(pos, Channel::Courage).clamp(0.0, 1.0);
        change += (courage - fear) * AMBIENT_DRIFT;

        if !is_suppressed(suppression) {
            mates.clear();
            grid.query_team_into(planar(pos), COHESION_RADIUS, combatants.team[i], &mut mates);
            let squad = combatants.squad[i];
            let nearby = mates
                .iter()
                .filter(|m| **m != id && combatants.squad[m.index()] == squad)
                .count()
                .min(COHESION_CAP);
            change += config.morale_recovery + nearby as f32 * config.morale_cohesion_bonus;
        }

        combatants.morale[i] = (combatants.morale[i] + change * delta).clamp(0.0, 1.0);

        if combatants.frozen_timer[i] > 0.0 {
            combatants.frozen_timer[i] = (combatants.frozen_timer[i] - delta).max(0.0);
        }

        // A badly wounded combatant drops and can no longer fight.
        if health < config.downed_health
            && !matches!(combatants.state[i], CombatState::Downed | CombatState::Dead)
        {
            trace!(?id, health, "downed");
            combatants.enter_state(id, CombatState::Downed);
            combatants.target[i] = None;
            combatants.suppressive[i] = false;
            combatants.posture_target[i] = Posture::Prone;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::SpawnParams;
    use crate::stigmergy::{GridField, Stigmergy};
    use std::sync::Arc;

    fn world(spots: &[(u32, f32)]) -> World {
        let mut world = World::new();
        world.insert_resource(DeltaTime(1.0));
        let config = SimConfig::default();
        let mut c = Combatants::with_capacity(8);
        for (k, &(squad, x)) in spots.iter().enumerate() {
            c.spawn(SpawnParams::new(Team::Blue, Role::Rifleman, squad, Vec3::new(x, 0.0, 0.0)), k as u16)
                .unwrap();
        }
        let mut grid = SpatialGrid::new(64.0, 64.0, 8.0, 8);
        grid.rebuild(&c);
        world.insert_resource(grid);
        world.insert_resource(c);
        world.insert_resource(config);
        world.insert_resource(WorldLinks::default());
        world
    }

    fn run(world: &mut World) {
        let mut schedule = Schedule::default();
        schedule.add_systems(morale_system);
        schedule.run(world);
    }

    #[test]
    fn test_pinned_loses_morale() {
        let mut w = world(&[(0, 0.0)]);
        w.resource_mut::<Combatants>().suppression[0] = 0.9;
        run(&mut w);
        let m = w.resource::<Combatants>().morale[0];
        assert!((m - (1.0 - SimConfig::default().morale_pinned_penalty)).abs() < 1e-5);
    }

    #[test]
    fn test_cohesion_speeds_recovery() {
        let mut w = world(&[(0, 0.0), (0, 3.0), (1, 40.0)]);
        {
            let mut c = w.resource_mut::<Combatants>();
            for i in 0..3 {
                c.morale[i] = 0.5;
            }
        }
        run(&mut w);
        let c = w.resource::<Combatants>();
        assert!(c.morale[0] > c.morale[2]);
    }

    #[test]
    fn test_fear_raises_break_threshold() {
        let config = SimConfig::default();
        let calm = break_threshold(Personality::Steady, 0.0, 0.0, &config);
        let afraid = break_threshold(Personality::Steady, 1.0, 0.0, &config);
        let brave = break_threshold(Personality::Steady, 0.0, 1.0, &config);
        assert!(afraid > calm && calm > brave);
    }

    #[test]
    fn test_ambient_fear_drains_morale() {
        let mut w = world(&[(0, 0.0)]);
        let field = Arc::new(GridField::new(4.0));
        field.deposit(Vec3::ZERO, Channel::Fear, 1.0);
        w.insert_resource(WorldLinks {
            stigmergy: Some(field),
            ..Default::default()
        });
        w.resource_mut::<Combatants>().morale[0] = 0.5;
        w.resource_mut::<Combatants>().suppression[0] = 0.5;
        run(&mut w);
        assert!(w.resource::<Combatants>().morale[0] < 0.5 - SimConfig::default().morale_suppressed_penalty);
    }

    #[test]
    fn test_low_health_goes_down() {
        let mut w = world(&[(0, 0.0)]);
        w.resource_mut::<Combatants>().health[0] = 0.1;
        run(&mut w);
        let c = w.resource::<Combatants>();
        assert_eq!(c.state[0], CombatState::Downed);
        assert_eq!(c.posture_target[0], Posture::Prone);
    }

    #[test]
    fn test_death_shock() {
        let mut w = world(&[(0, 0.0), (0, 2.0), (0, 50.0)]);
        let config = SimConfig::default();
        let grid = w.resource::<SpatialGrid>().clone();
        let mut c = w.resource_mut::<Combatants>();
        c.morale[2] = 0.5;
        apply_death_shock(&mut c, &grid, &config, EntityId(0), Some(EntityId(2)));
        assert!(c.morale[1] < 1.0);
        assert!(c.morale[2] > 0.5);
    }
}
