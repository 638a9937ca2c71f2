//! Area effects of bursting payloads.
//!
//! High explosive has two independent falloff bands: inside the lethal
//! radius it wounds and suppresses, out to the suppression radius it only
//! suppresses. Smoke and gas payloads leave a hazard cloud instead.

use crate::components::*;
use crate::config::SimConfig;
use crate::entity::{Combatants, EntityId};
use crate::links::WorldLinks;
use crate::math::{entity_rng, planar, point_segment_distance};
use crate::spatial::SpatialGrid;
use crate::stigmergy::Channel;
use crate::systems::combat::{wound, Wound};
use crate::systems::diagnostics::TickCounters;
use crate::systems::hazards::{HazardKind, Hazards};
use crate::systems::projectile::{Detonation, Projectiles};
use crate::systems::suppression::add_suppression;
use crate::systems::time::{streams, SimSeed, SimTick};
use bevy_ecs::prelude::*;
use glam::Vec3;
use rand::Rng;
use tracing::debug;

/// Floor of the suppression falloff at the outer edge.
const MIN_SUPPRESSION_FRACTION: f32 = 0.25;
/// Suppression kept when a wall shields the body from the blast.
const SHIELDED_SUPPRESSION: f32 = 0.5;
const DANGER_DEPOSIT: f32 = 1.0;
const FEAR_DEPOSIT: f32 = 0.5;
/// Top of the body segment the blast measures distance to.
const BODY_HEIGHT: f32 = 1.8;

/// What a single blast did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlastReport {
    pub wounded: Vec<EntityId>,
    pub killed: Vec<EntityId>,
    /// Caught only in the suppression band.
    pub suppressed: Vec<EntityId>,
}

/// Distance from the blast to the nearest point of a standing body.
fn body_distance(c: &Combatants, id: EntityId, at: Vec3) -> f32 {
    let feet = c.position[id.index()];
    point_segment_distance(at, feet, feet + Vec3::Y * BODY_HEIGHT).0
}

/// Resolve one detonation against the world.
#[allow(clippy::too_many_arguments)]
pub fn detonate(
    d: &Detonation,
    combatants: &mut Combatants,
    grid: &SpatialGrid,
    links: &WorldLinks,
    hazards: &mut Hazards,
    config: &SimConfig,
    seed: u64,
    tick: u64,
    counters: &mut TickCounters,
) -> BlastReport {
    let mut report = BlastReport::default();
    match d.payload {
        PayloadKind::Smoke => {
            hazards.spawn(HazardKind::Smoke, d.position, config.smoke_radius, config.smoke_duration);
            return report;
        }
        PayloadKind::Gas => {
            hazards.spawn(HazardKind::Gas, d.position, config.gas_radius, config.gas_duration);
            return report;
        }
        PayloadKind::Kinetic => return report,
        PayloadKind::Explosive => {}
    }

    counters.explosions += 1;
    let lethal = config.explosion_lethal_radius.max(0.0);
    let outer = config.explosion_suppression_radius.max(lethal);
    links.deposit_radius(d.position, Channel::Danger, DANGER_DEPOSIT, outer);
    links.deposit_radius(d.position, Channel::Fear, FEAR_DEPOSIT, outer);

    let mut caught = grid.query_radius(planar(d.position), outer + BODY_HEIGHT);
    caught.sort_unstable();
    for id in caught {
        if !combatants.is_alive(id) {
            continue;
        }
        let i = id.index();
        let distance = body_distance(combatants, id, d.position);
        if distance > outer {
            continue;
        }
        let shielded = !links.check_los(d.position, combatants.body_center(id));

        if distance <= lethal {
            let falloff = if lethal > 0.0 { 1.0 - distance / lethal } else { 1.0 };
            let ally = d.team == Some(combatants.team[i]);
            let spared = ally && {
                let stream = streams::FRIENDLY_FIRE ^ (d.serial << 8);
                entity_rng(seed, tick, id.0, stream).gen::<f32>() >= config.explosion_friendly_fire
            };
            let mut suppression = config.explosion_suppression;
            if shielded {
                suppression *= SHIELDED_SUPPRESSION;
            } else if !spared {
                let damage = config.explosion_damage * falloff;
                match wound(combatants, grid, config, id, damage, d.shooter, tick) {
                    Wound::Killed => {
                        counters.deaths += 1;
                        report.killed.push(id);
                        continue;
                    }
                    Wound::Wounded => report.wounded.push(id),
                    Wound::Unhurt => {}
                }
            }
            add_suppression(combatants, i, suppression);
        } else {
            let band = outer - lethal;
            let t = if band > 0.0 { (distance - lethal) / band } else { 1.0 };
            let mut suppression =
                config.explosion_suppression * (1.0 - t).max(MIN_SUPPRESSION_FRACTION);
            if shielded {
                suppression *= SHIELDED_SUPPRESSION;
            }
            add_suppression(combatants, i, suppression);
            report.suppressed.push(id);
        }
        combatants.combat_timer[i] = 0.0;
        let away = planar(d.position - combatants.position[i]);
        if away.length_squared() > 1e-6 {
            combatants.threat_dir[i] = away.normalize();
        }
    }

    debug!(
        at = ?d.position,
        killed = report.killed.len(),
        wounded = report.wounded.len(),
        suppressed = report.suppressed.len(),
        "explosion"
    );
    report
}

/// Resolves every detonation queued this tick, in queue order.
pub fn explosion_system(
    tick: Res<SimTick>,
    seed: Res<SimSeed>,
    config: Res<SimConfig>,
    links: Res<WorldLinks>,
    grid: Res<SpatialGrid>,
    mut projectiles: ResMut<Projectiles>,
    mut hazards: ResMut<Hazards>,
    mut combatants: ResMut<Combatants>,
    mut counters: ResMut<TickCounters>,
) {
    if projectiles.detonations.is_empty() {
        return;
    }
    let queued = std::mem::take(&mut projectiles.detonations);
    for d in &queued {
        detonate(
            d,
            &mut combatants,
            &grid,
            &links,
            &mut hazards,
            &config,
            seed.0,
            tick.0,
            &mut counters,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::SpawnParams;

    struct Blast {
        combatants: Combatants,
        grid: SpatialGrid,
        links: WorldLinks,
        hazards: Hazards,
        config: SimConfig,
        counters: TickCounters,
    }

    impl Blast {
        fn new(spots: &[(Team, f32)]) -> Self {
            let mut combatants = Combatants::with_capacity(16);
            for (k, &(team, x)) in spots.iter().enumerate() {
                combatants
                    .spawn(SpawnParams::new(team, Role::Rifleman, 0, Vec3::new(x, 0.0, 0.0)), k as u16)
                    .unwrap();
            }
            let mut grid = SpatialGrid::new(64.0, 64.0, 8.0, 16);
            grid.rebuild(&combatants);
            Self {
                combatants,
                grid,
                links: WorldLinks::default(),
                hazards: Hazards::default(),
                config: SimConfig::default(),
                counters: TickCounters::default(),
            }
        }

        fn go(&mut self, payload: PayloadKind, team: Option<Team>, serial: u64) -> BlastReport {
            let d = Detonation {
                position: Vec3::ZERO,
                payload,
                team,
                shooter: None,
                serial,
            };
            detonate(
                &d,
                &mut self.combatants,
                &self.grid,
                &self.links,
                &mut self.hazards,
                &self.config,
                5,
                1,
                &mut self.counters,
            )
        }
    }

    #[test]
    fn test_bands_damage_inside_and_suppress_outside() {
        let mut b = Blast::new(&[
            (Team::Red, 0.5),
            (Team::Red, 3.0),
            (Team::Red, 6.0),
            (Team::Red, 7.9),
            (Team::Red, 12.0),
        ]);
        let report = b.go(PayloadKind::Explosive, None, 0);
        let c = &b.combatants;

        // Falloff: closer hurts more.
        assert_eq!(report.killed, vec![EntityId(0)]);
        assert!(c.health[1] < 1.0 && c.health[1] > 0.0);
        for i in [2, 3] {
            assert_eq!(c.health[i], 1.0);
            assert!(c.suppression[i] > 0.0);
        }
        assert!(c.suppression[2] > c.suppression[3]);
        assert_eq!(c.health[4], 1.0);
        assert_eq!(c.suppression[4], 0.0);
        assert_eq!(b.counters.explosions, 1);
        assert_eq!(b.counters.deaths, 1);
    }

    #[test]
    fn test_friendly_fire_is_a_roll() {
        let spots: Vec<(Team, f32)> = (0..12).map(|k| (Team::Blue, 1.0 + k as f32 * 0.2)).collect();
        let mut b = Blast::new(&spots);
        b.config.explosion_friendly_fire = 0.0;
        b.go(PayloadKind::Explosive, Some(Team::Blue), 3);
        assert!(b.combatants.health.iter().all(|h| *h == 1.0));
        assert!(b.combatants.suppression.iter().all(|s| *s > 0.0));

        let mut b = Blast::new(&spots);
        b.config.explosion_friendly_fire = 1.0;
        b.go(PayloadKind::Explosive, Some(Team::Blue), 3);
        assert!(b.combatants.health.iter().all(|h| *h < 1.0));
    }

    #[test]
    fn test_smoke_and_gas_leave_clouds() {
        let mut b = Blast::new(&[(Team::Red, 1.0)]);
        b.go(PayloadKind::Smoke, None, 0);
        b.go(PayloadKind::Gas, None, 1);
        assert_eq!(b.hazards.clouds.len(), 2);
        assert_eq!(b.combatants.health[0], 1.0);
        assert_eq!(b.counters.explosions, 0);
    }

    #[test]
    fn test_system_drains_queue() {
        let b = Blast::new(&[(Team::Red, 2.0)]);
        let mut world = World::new();
        world.insert_resource(SimTick(0));
        world.insert_resource(SimSeed(0));
        world.insert_resource(b.config);
        world.insert_resource(b.links);
        world.insert_resource(b.grid);
        world.insert_resource(b.hazards);
        world.insert_resource(b.combatants);
        world.insert_resource(b.counters);
        let mut pool = Projectiles::default();
        pool.queue_detonation(Vec3::ZERO, PayloadKind::Explosive, None, None);
        world.insert_resource(pool);

        let mut schedule = Schedule::default();
        schedule.add_systems(explosion_system);
        schedule.run(&mut world);

        assert!(world.resource::<Projectiles>().detonations.is_empty());
        assert!(world.resource::<Combatants>().health[0] < 1.0);
    }
}
