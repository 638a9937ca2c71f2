//! Firing: turns combatants in an active-fire state into projectiles.
//!
//! The system runs in two phases, like the rest of the heavy stages:
//!
//! 1. **Gate + timers** (sequential): cooldowns and reloads tick down, and
//!    every combatant that is allowed to pull the trigger this tick is
//!    collected.
//! 2. **Plan** (read-only, parallel under `parallel`): each shooter
//!    re-verifies line of sight, computes its spread cone and builds the
//!    rounds it fires.
//! 3. **Apply** (sequential, id order): rounds enter the projectile pool,
//!    ammo and cooldowns are charged, contact signals are deposited.
//!
//! Every random draw is keyed by (seed, tick, shooter, stream), so the
//! output does not depend on whether phase 2 ran in parallel.

use super::gather;
use crate::components::*;
use crate::config::SimConfig;
use crate::entity::{Combatants, EntityId};
use crate::links::WorldLinks;
use crate::math::{entity_rng, from_heading, lift, planar};
use crate::spatial::SpatialGrid;
use crate::stigmergy::Channel;
use crate::systems::diagnostics::TickCounters;
use crate::systems::hazards::Hazards;
use crate::systems::morale::{apply_death_shock, apply_hit_shock};
use crate::systems::perception::has_line_of_sight;
use crate::systems::projectile::{Projectile, Projectiles};
use crate::systems::time::{streams, DeltaTime, SimSeed, SimTick};
use bevy_ecs::prelude::*;
use glam::Vec3;
use rand::Rng;
use smallvec::SmallVec;
use tracing::trace;

/// Rounds per trigger pull for belt-fed weapons.
const GUNNER_BURST: u16 = 3;
/// Spread growth at full suppression.
const SUPPRESSION_SPREAD: f32 = 2.0;
/// Spread growth at the move-fire speed limit.
const MOVING_SPREAD: f32 = 0.5;
const BERSERK_SPREAD: f32 = 1.5;
/// Spread shrink per meter of height advantage.
const HEIGHT_NARROWING: f32 = 0.04;
const MAX_HEIGHT_ADVANTAGE: f32 = 5.0;
/// Horizontal shell speed used to pick a mortar flight time.
const SHELL_SPEED: f32 = 40.0;
const MIN_SHELL_TIME: f32 = 2.0;
const MAX_SHELL_TIME: f32 = 8.0;
/// Lifetime margin past the nominal time to target.
const LIFETIME_MARGIN: f32 = 1.2;
const CONTACT_DEPOSIT: f32 = 0.2;
const FIRE_SUPPRESSION_DEPOSIT: f32 = 0.1;
const FIRE_SUPPRESSION_RADIUS: f32 = 3.0;

/// Result of applying damage to one combatant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wound {
    Unhurt,
    Wounded,
    Killed,
}

/// Apply damage, the morale hit, and on death the kill bookkeeping.
pub fn wound(
    combatants: &mut Combatants,
    grid: &SpatialGrid,
    config: &SimConfig,
    id: EntityId,
    damage: f32,
    killer: Option<EntityId>,
    tick: u64,
) -> Wound {
    if damage <= 0.0 || !combatants.is_alive(id) {
        return Wound::Unhurt;
    }
    let i = id.index();
    combatants.health[i] -= damage;
    apply_hit_shock(combatants, i, config);
    if combatants.health[i] > 0.0 {
        return Wound::Wounded;
    }
    trace!(?id, ?killer, "killed");
    combatants.kill(id, tick);
    apply_death_shock(combatants, grid, config, id, killer);
    Wound::Killed
}

/// Rounds fired per trigger pull.
#[inline]
pub fn burst_length(role: Role) -> u16 {
    match role {
        Role::Gunner => GUNNER_BURST,
        _ => 1,
    }
}

/// Half-angle of the shot cone in radians.
pub fn effective_spread(combatants: &Combatants, config: &SimConfig, i: usize, aim: Vec3) -> f32 {
    let weapon = combatants.role[i].weapon();
    let mut spread = weapon.spread * combatants.posture[i].spread_factor();
    spread *= 1.0 + SUPPRESSION_SPREAD * combatants.suppression[i];

    let speed = planar(combatants.actual_velocity[i]).length();
    spread *= 1.0 + MOVING_SPREAD * (speed / config.move_fire_speed.max(0.1)).min(2.0);

    let settled = if weapon.settle_time > 0.0 {
        (combatants.settle_timer[i] / weapon.settle_time).clamp(0.0, 1.0)
    } else {
        1.0
    };
    spread *= 2.0 - settled;

    if combatants.state[i] == CombatState::Berserk {
        spread *= BERSERK_SPREAD;
    }
    let height = (combatants.position[i].y - aim.y).clamp(0.0, MAX_HEIGHT_ADVANTAGE);
    spread *= 1.0 - HEIGHT_NARROWING * height;

    if combatants.suppressive[i] {
        spread *= config.suppressive_scatter;
    }
    spread
}

/// Random direction inside a cone of half-angle `spread` around `dir`.
pub fn cone<R: Rng>(dir: Vec3, spread: f32, rng: &mut R) -> Vec3 {
    if spread <= 0.0 {
        return dir;
    }
    let (u, v) = dir.any_orthonormal_pair();
    let theta = rng.gen::<f32>() * std::f32::consts::TAU;
    let angle = spread * rng.gen::<f32>().sqrt();
    (dir + (u * theta.cos() + v * theta.sin()) * angle.tan()).normalize_or(dir)
}

/// Launch velocity of a mortar shell landing on `land`, and its flight time.
pub fn shell_launch(origin: Vec3, land: Vec3, gravity: f32) -> (Vec3, f32) {
    let delta = land - origin;
    let t = (planar(delta).length() / SHELL_SPEED).clamp(MIN_SHELL_TIME, MAX_SHELL_TIME);
    let v = Vec3::new(delta.x / t, (delta.y + 0.5 * gravity * t * t) / t, delta.z / t);
    (v, t)
}

/// Everything a trigger pull produces.
#[derive(Debug, Clone, Default)]
pub struct ShotPlan {
    pub rounds: SmallVec<[Projectile; 3]>,
    pub los_checks: u32,
    pub aim_quality: f32,
    pub aim: Vec3,
}

/// Read-only inputs of shot planning.
pub struct FireView<'a> {
    pub combatants: &'a Combatants,
    pub links: &'a WorldLinks,
    pub hazards: &'a Hazards,
    pub config: &'a SimConfig,
    pub seed: u64,
    pub tick: u64,
}

/// Where the shooter is aiming right now.
fn current_aim(c: &Combatants, i: usize) -> Option<Vec3> {
    let target = c.target[i]?;
    if !c.is_alive(target) {
        return None;
    }
    if c.suppressive[i] {
        Some(c.aim_point[i])
    } else {
        Some(c.body_center(target))
    }
}

pub fn plan_shot(view: &FireView, id: EntityId) -> ShotPlan {
    let c = view.combatants;
    let i = id.index();
    let mut plan = ShotPlan::default();
    let Some(aim) = current_aim(c, i) else {
        return plan;
    };
    plan.aim = aim;
    let role = c.role[i];
    let weapon = role.weapon();
    let eye = c.eye(id);
    let distance = eye.distance(aim);
    if distance > weapon.max_range {
        return plan;
    }
    if role.is_direct_fire() {
        plan.los_checks += 1;
        if !has_line_of_sight(view.links, view.hazards, eye, aim) {
            return plan;
        }
    }

    let spread = effective_spread(c, view.config, i, aim);
    plan.aim_quality = (weapon.spread / spread.max(1e-6)).clamp(0.0, 1.0);
    let fallback = lift(from_heading(c.facing[i]), 0.0);
    let dir = (aim - eye).normalize_or(fallback);
    let rounds = burst_length(role).min(c.ammo[i]);
    let gravity = view.config.gravity;

    let mut rng = entity_rng(view.seed, view.tick, id.0, streams::SPREAD);
    let mut scatter = entity_rng(view.seed, view.tick, id.0, streams::SCATTER);
    for _ in 0..rounds {
        let (velocity, flight) = if weapon.indirect {
            let r = spread * distance * scatter.gen::<f32>().sqrt();
            let land = aim + lift(from_heading(scatter.gen::<f32>() * std::f32::consts::TAU) * r, 0.0);
            shell_launch(eye, land, gravity)
        } else {
            let t = distance / weapon.muzzle_velocity.max(1.0);
            let v = cone(dir, spread, &mut rng) * weapon.muzzle_velocity + Vec3::Y * (0.5 * gravity * t);
            (v, weapon.max_range / weapon.muzzle_velocity.max(1.0))
        };
        plan.rounds.push(Projectile {
            serial: 0,
            shooter: id,
            team: c.team[i],
            position: eye,
            velocity,
            damage: weapon.damage,
            energy: weapon.penetration,
            muzzle_energy: weapon.penetration,
            payload: c.payload[i],
            lifetime: flight * LIFETIME_MARGIN,
            suppressive: c.suppressive[i],
            touched: SmallVec::new(),
        });
    }
    plan
}

/// Start a reload if the magazine is empty. Returns true when reloading.
fn reload_if_empty(combatants: &mut Combatants, id: EntityId) -> bool {
    let i = id.index();
    if combatants.ammo[i] > 0 {
        return false;
    }
    if combatants.state[i] != CombatState::Reloading {
        trace!(?id, "reloading");
        combatants.enter_state(id, CombatState::Reloading);
        combatants.reload_timer[i] = combatants.role[i].weapon().reload_time;
    }
    true
}

/// Timers, reload completion and the fire gate. Returns the shooters.
fn tick_weapons(combatants: &mut Combatants, config: &SimConfig, dt: f32) -> Vec<EntityId> {
    let ids: Vec<EntityId> = combatants.alive_ids().collect();
    let mut shooters = Vec::new();
    for id in ids {
        let i = id.index();
        combatants.combat_timer[i] += dt;
        combatants.cooldown[i] = (combatants.cooldown[i] - dt).max(0.0);

        if combatants.state[i] == CombatState::Reloading {
            combatants.reload_timer[i] -= dt;
            if combatants.reload_timer[i] > 0.0 {
                continue;
            }
            combatants.reload_timer[i] = 0.0;
            combatants.ammo[i] = combatants.role[i].weapon().magazine;
            combatants.state[i] = combatants.resume_state[i];
            trace!(?id, resume = ?combatants.state[i], "reload complete");
        }

        let state = combatants.state[i];
        if !state.is_active_fire() || combatants.deploy_timer[i] > 0.0 {
            continue;
        }
        let charging = state == CombatState::Berserk || combatants.mode[i] == MovementMode::Charge;
        let speed = planar(combatants.actual_velocity[i]).length();
        if !charging && speed > config.move_fire_speed {
            continue;
        }
        if reload_if_empty(combatants, id) || combatants.cooldown[i] > 0.0 {
            continue;
        }
        match combatants.target[i] {
            Some(t) if combatants.is_alive(t) => shooters.push(id),
            Some(_) => {
                combatants.target[i] = None;
                combatants.suppressive[i] = false;
            }
            None => {}
        }
    }
    shooters
}

pub fn combat_system(
    dt: Res<DeltaTime>,
    tick: Res<SimTick>,
    seed: Res<SimSeed>,
    config: Res<SimConfig>,
    links: Res<WorldLinks>,
    hazards: Res<Hazards>,
    mut combatants: ResMut<Combatants>,
    mut projectiles: ResMut<Projectiles>,
    mut counters: ResMut<TickCounters>,
) {
    let shooters = tick_weapons(&mut combatants, &config, dt.0);
    if shooters.is_empty() {
        return;
    }

    let view = FireView {
        combatants: &*combatants,
        links: &*links,
        hazards: &*hazards,
        config: &*config,
        seed: seed.0,
        tick: tick.0,
    };
    let plans = gather(&shooters, |&id| plan_shot(&view, id));

    for (&id, plan) in shooters.iter().zip(plans) {
        counters.los_checks += plan.los_checks;
        if plan.rounds.is_empty() {
            continue;
        }
        let i = id.index();
        let mut spawned = 0u16;
        for round in plan.rounds {
            if projectiles.spawn(round) {
                spawned += 1;
            }
        }
        // Rounds refused by a full pool are never fired.
        if spawned == 0 {
            continue;
        }
        counters.shots_fired += spawned as u32;
        combatants.ammo[i] = combatants.ammo[i].saturating_sub(spawned);
        combatants.cooldown[i] = combatants.role[i].weapon().fire_interval * spawned as f32;
        combatants.combat_timer[i] = 0.0;
        combatants.aim_quality[i] = plan.aim_quality;
        let threat = planar(plan.aim - combatants.position[i]);
        if threat.length_squared() > 1e-6 {
            combatants.threat_dir[i] = threat.normalize();
        }

        links.deposit(combatants.position[i], Channel::Contact, CONTACT_DEPOSIT);
        links.deposit_radius(
            plan.aim,
            Channel::Suppression,
            FIRE_SUPPRESSION_DEPOSIT,
            FIRE_SUPPRESSION_RADIUS,
        );
        reload_if_empty(&mut combatants, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::SpawnParams;
    use crate::terrain::{Material, VoxelTerrain};
    use glam::Vec2;
    use std::sync::Arc;

    fn range(shooter: Role, target_at: Vec3) -> World {
        let mut world = World::new();
        world.insert_resource(DeltaTime(1.0 / 30.0));
        world.insert_resource(SimTick(3));
        world.insert_resource(SimSeed(11));
        world.insert_resource(SimConfig::default());
        world.insert_resource(WorldLinks::default());
        world.insert_resource(Hazards::default());
        world.insert_resource(Projectiles::default());
        world.insert_resource(TickCounters::default());

        let mut c = Combatants::with_capacity(4);
        let s = c.spawn(SpawnParams::new(Team::Blue, shooter, 0, Vec3::ZERO), 0).unwrap();
        let t = c.spawn(SpawnParams::new(Team::Red, Role::Rifleman, 1, target_at), 0).unwrap();
        let i = s.index();
        c.state[i] = CombatState::Engaging;
        c.target[i] = Some(t);
        c.deploy_timer[i] = 0.0;
        c.settle_timer[i] = 10.0;
        world.insert_resource(c);
        world
    }

    fn run(world: &mut World) {
        let mut schedule = Schedule::default();
        schedule.add_systems(combat_system);
        schedule.run(world);
    }

    #[test]
    fn test_engaging_shooter_fires_one_round() {
        let mut w = range(Role::Rifleman, Vec3::new(20.0, 0.0, 0.0));
        run(&mut w);
        let c = w.resource::<Combatants>();
        assert_eq!(w.resource::<Projectiles>().len(), 1);
        assert_eq!(c.ammo[0], Role::Rifleman.weapon().magazine - 1);
        assert!(c.cooldown[0] > 0.0);
        assert_eq!(c.combat_timer[0], 0.0);
        assert_eq!(w.resource::<TickCounters>().shots_fired, 1);
        assert_eq!(w.resource::<TickCounters>().los_checks, 1);
    }

    #[test]
    fn test_cooldown_holds_fire() {
        let mut w = range(Role::Rifleman, Vec3::new(20.0, 0.0, 0.0));
        run(&mut w);
        run(&mut w);
        assert_eq!(w.resource::<Projectiles>().len(), 1);
    }

    #[test]
    fn test_moving_shooter_holds_fire_unless_charging() {
        let mut w = range(Role::Rifleman, Vec3::new(20.0, 0.0, 0.0));
        w.resource_mut::<Combatants>().actual_velocity[0] = Vec3::new(3.0, 0.0, 0.0);
        run(&mut w);
        assert!(w.resource::<Projectiles>().is_empty());

        w.resource_mut::<Combatants>().mode[0] = MovementMode::Charge;
        run(&mut w);
        assert_eq!(w.resource::<Projectiles>().len(), 1);
    }

    #[test]
    fn test_gunner_waits_for_deploy_then_bursts() {
        let mut w = range(Role::Gunner, Vec3::new(20.0, 0.0, 0.0));
        w.resource_mut::<Combatants>().deploy_timer[0] = 1.0;
        run(&mut w);
        assert!(w.resource::<Projectiles>().is_empty());

        w.resource_mut::<Combatants>().deploy_timer[0] = 0.0;
        run(&mut w);
        assert_eq!(w.resource::<Projectiles>().len(), GUNNER_BURST as usize);
        let c = w.resource::<Combatants>();
        assert_eq!(c.ammo[0], Role::Gunner.weapon().magazine - GUNNER_BURST);
    }

    #[test]
    fn test_full_pool_charges_only_rounds_that_left() {
        let mut w = range(Role::Gunner, Vec3::new(20.0, 0.0, 0.0));
        w.insert_resource(Projectiles::with_capacity(1));
        run(&mut w);
        assert_eq!(w.resource::<Projectiles>().len(), 1);
        let c = w.resource::<Combatants>();
        assert_eq!(c.ammo[0], Role::Gunner.weapon().magazine - 1);
        assert!((c.cooldown[0] - Role::Gunner.weapon().fire_interval).abs() < 1e-6);
        assert_eq!(w.resource::<TickCounters>().shots_fired, 1);

        // Nothing leaves a pool that is already full.
        w.resource_mut::<Combatants>().cooldown[0] = 0.0;
        run(&mut w);
        let c = w.resource::<Combatants>();
        assert_eq!(c.ammo[0], Role::Gunner.weapon().magazine - 1);
        assert_eq!(c.cooldown[0], 0.0);
    }

    #[test]
    fn test_empty_magazine_reloads_and_resumes() {
        let mut w = range(Role::Rifleman, Vec3::new(20.0, 0.0, 0.0));
        w.resource_mut::<Combatants>().ammo[0] = 1;
        run(&mut w);
        {
            let c = w.resource::<Combatants>();
            assert_eq!(c.state[0], CombatState::Reloading);
            assert_eq!(c.resume_state[0], CombatState::Engaging);
        }
        w.insert_resource(DeltaTime(Role::Rifleman.weapon().reload_time + 0.1));
        run(&mut w);
        let c = w.resource::<Combatants>();
        assert_eq!(c.state[0], CombatState::Engaging);
        assert_eq!(c.ammo[0], Role::Rifleman.weapon().magazine - 1);
    }

    #[test]
    fn test_wall_blocks_direct_fire_but_not_mortar() {
        let mut terrain = VoxelTerrain::flat(64, 64, 1.0, 0);
        terrain.add_wall(Vec2::new(10.5, -5.0), Vec2::new(10.5, 5.0), 4, Material::Concrete);
        let links = WorldLinks {
            terrain: Some(Arc::new(terrain)),
            ..Default::default()
        };

        let mut w = range(Role::Rifleman, Vec3::new(20.0, 0.0, 0.0));
        w.insert_resource(links.clone());
        run(&mut w);
        assert!(w.resource::<Projectiles>().is_empty());
        assert_eq!(w.resource::<TickCounters>().los_checks, 1);

        let mut w = range(Role::Mortar, Vec3::new(20.0, 0.0, 0.0));
        w.insert_resource(links);
        {
            let mut c = w.resource_mut::<Combatants>();
            c.state[0] = CombatState::Suppressing;
            c.suppressive[0] = true;
            c.aim_point[0] = Vec3::new(20.0, 0.0, 0.0);
        }
        run(&mut w);
        assert_eq!(w.resource::<Projectiles>().len(), 1);
        assert_eq!(w.resource::<TickCounters>().los_checks, 0);
    }

    #[test]
    fn test_dead_target_is_dropped() {
        let mut w = range(Role::Rifleman, Vec3::new(20.0, 0.0, 0.0));
        w.resource_mut::<Combatants>().kill(EntityId(1), 0);
        run(&mut w);
        assert!(w.resource::<Projectiles>().is_empty());
        assert_eq!(w.resource::<Combatants>().target[0], None);
    }

    #[test]
    fn test_spread_widens_under_stress_and_narrows_with_height() {
        let mut c = Combatants::with_capacity(2);
        c.spawn(SpawnParams::new(Team::Blue, Role::Rifleman, 0, Vec3::ZERO), 0).unwrap();
        c.settle_timer[0] = 10.0;
        let config = SimConfig::default();
        let aim = Vec3::new(30.0, 1.0, 0.0);
        let calm = effective_spread(&c, &config, 0, aim);
        assert!((calm - Role::Rifleman.weapon().spread).abs() < 1e-6);

        c.suppression[0] = 0.8;
        assert!(effective_spread(&c, &config, 0, aim) > calm);
        c.suppression[0] = 0.0;

        c.settle_timer[0] = 0.0;
        assert!(effective_spread(&c, &config, 0, aim) > calm);
        c.settle_timer[0] = 10.0;

        c.position[0].y = 4.0;
        assert!(effective_spread(&c, &config, 0, aim) < calm);
    }

    #[test]
    fn test_shell_lands_on_target() {
        let origin = Vec3::new(0.0, 1.0, 0.0);
        let land = Vec3::new(80.0, 0.0, 30.0);
        let (v, t) = shell_launch(origin, land, 9.81);
        let at = origin + v * t - Vec3::Y * 0.5 * 9.81 * t * t;
        assert!(at.distance(land) < 1e-2);
        assert!(v.y > 0.0);
    }

    #[test]
    fn test_wound_kills_and_reports() {
        let mut c = Combatants::with_capacity(2);
        let id = c.spawn(SpawnParams::new(Team::Blue, Role::Rifleman, 0, Vec3::ZERO), 0).unwrap();
        let mut grid = SpatialGrid::new(32.0, 32.0, 8.0, 2);
        grid.rebuild(&c);
        let config = SimConfig::default();
        assert_eq!(wound(&mut c, &grid, &config, id, 0.4, None, 1), Wound::Wounded);
        assert_eq!(wound(&mut c, &grid, &config, id, 0.7, None, 2), Wound::Killed);
        assert_eq!(c.state[0], CombatState::Dead);
        assert_eq!(c.death_tick[0], Some(2));
        assert_eq!(wound(&mut c, &grid, &config, id, 0.7, None, 3), Wound::Unhurt);
    }

    #[test]
    fn test_same_seed_same_shots() {
        let shoot = || {
            let mut w = range(Role::Gunner, Vec3::new(40.0, 0.0, 5.0));
            w.resource_mut::<Combatants>().suppression[0] = 0.5;
            run(&mut w);
            w.resource::<Projectiles>()
                .active
                .iter()
                .map(|p| p.velocity)
                .collect::<Vec<_>>()
        };
        let a = shoot();
        assert_eq!(a.len(), GUNNER_BURST as usize);
        assert_eq!(a, shoot());
        assert_ne!(a[0], a[1]);
    }
}
