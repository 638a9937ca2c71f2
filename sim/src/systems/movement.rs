//! Locomotion: turns the avoidance velocity into actual motion.
//!
//! Velocity eases toward the solved target with posture-dependent
//! exponential rates, heading turns at a bounded rate, and the result is
//! resolved against the voxel terrain. Low steps are vaulted, mid-height
//! obstacles start a timed climb, and anything taller blocks. Walking off
//! a ledge starts a fall.

use crate::components::*;
use crate::config::SimConfig;
use crate::entity::{Combatants, EntityId};
use crate::links::WorldLinks;
use crate::math::{from_heading, heading, lift, normalize_or, planar, wrap_angle, EPSILON};
use crate::spatial::SpatialGrid;
use crate::systems::diagnostics::TickCounters;
use crate::systems::morale::apply_death_shock;
use crate::systems::time::{DeltaTime, SimTick};
use bevy_ecs::prelude::*;
use glam::{Vec2, Vec3};
use tracing::trace;

/// Rise smaller than this is just uneven ground.
const STEP_HEIGHT: f32 = 0.25;
/// Speed kept while vaulting.
const VAULT_SPEED_FACTOR: f32 = 0.6;
/// Health lost per m/s of landing speed above the damage threshold.
const FALL_DAMAGE_PER_SPEED: f32 = 0.1;
/// Rings searched when pushing a body out of solid geometry.
const PUSH_OUT_RINGS: usize = 3;
/// Body height probed for embedding.
const BODY_PROBE: f32 = 0.5;

/// What a locomotion step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Idle,
    Moved,
    Vaulted,
    StartedClimb,
    Climbing,
    FinishedClimb,
    Blocked,
    Fell,
    Falling,
    Landed,
}

/// Ease `current` toward `target` at exponential rates.
pub fn integrate_velocity(current: Vec2, target: Vec2, accel: f32, decel: f32, dt: f32) -> Vec2 {
    let rate = if target.length_squared() > current.length_squared() {
        accel
    } else {
        decel
    };
    let alpha = 1.0 - (-rate * dt).exp();
    current + (target - current) * alpha
}

/// Rotate `velocity` toward `target`'s heading by at most `max_turn` radians.
pub fn limit_turn(velocity: Vec2, previous_heading: f32, max_turn: f32) -> (Vec2, f32) {
    let speed = velocity.length();
    if speed < EPSILON {
        return (velocity, previous_heading);
    }
    let wanted = heading(velocity);
    let delta = wrap_angle(wanted - previous_heading).clamp(-max_turn, max_turn);
    let facing = wrap_angle(previous_heading + delta);
    (from_heading(facing) * speed, facing)
}

/// Clear column near `pos` to push an embedded body into.
fn push_out(links: &WorldLinks, config: &SimConfig, pos: Vec3) -> Option<Vec3> {
    let voxel = links.voxel_size();
    for ring in 1..=PUSH_OUT_RINGS {
        let r = ring as f32 * voxel;
        for k in 0..8 {
            let flat = planar(pos) + from_heading(k as f32 * std::f32::consts::FRAC_PI_4) * r;
            let ground = links.ground_height(flat.x, flat.y, pos.y);
            if ground - pos.y <= config.vault_height {
                let candidate = lift(flat, ground);
                if !links.is_solid(links.voxel_at(candidate + Vec3::Y * BODY_PROBE)) {
                    return Some(candidate);
                }
            }
        }
    }
    None
}

fn clamp_to_world(p: Vec3, config: &SimConfig) -> Vec3 {
    Vec3::new(
        p.x.clamp(-config.world_half_width, config.world_half_width),
        p.y,
        p.z.clamp(-config.world_half_height, config.world_half_height),
    )
}

/// Advance one combatant by one tick.
pub fn step_body(
    combatants: &mut Combatants,
    links: &WorldLinks,
    config: &SimConfig,
    id: EntityId,
    dt: f32,
) -> StepOutcome {
    let i = id.index();
    let pos = combatants.position[i];
    combatants.climb_cooldown[i] = (combatants.climb_cooldown[i] - dt).max(0.0);

    match combatants.state[i] {
        CombatState::Climbing => {
            combatants.climb_timer[i] += dt;
            let top = combatants.climb_target[i];
            let y = (pos.y + config.climb_speed * dt).min(top);
            combatants.position[i].y = y;
            if y < top {
                return StepOutcome::Climbing;
            }
            // Step onto the ledge.
            let forward = from_heading(combatants.facing[i]) * links.voxel_size();
            let flat = planar(pos) + forward;
            let ground = links.ground_height(flat.x, flat.y, top);
            combatants.position[i] = clamp_to_world(lift(flat, ground.max(top)), config);
            combatants.climb_timer[i] = 0.0;
            combatants.climb_cooldown[i] = config.climb_cooldown;
            let resume = combatants.resume_state[i];
            combatants.enter_state(id, resume);
            return StepOutcome::FinishedClimb;
        }
        CombatState::Falling => {
            let mut vy = combatants.actual_velocity[i].y - config.gravity * dt;
            let ground = links.ground_height(pos.x, pos.z, pos.y);
            let drift = planar(combatants.actual_velocity[i]) * dt;
            let mut y = pos.y + vy * dt;
            if y > ground {
                let moved = clamp_to_world(pos + lift(drift, 0.0), config);
                combatants.position[i] = Vec3::new(moved.x, y, moved.z);
                combatants.actual_velocity[i].y = vy;
                return StepOutcome::Falling;
            }
            let impact = -vy;
            y = ground;
            vy = 0.0;
            combatants.position[i].y = y;
            combatants.actual_velocity[i] = Vec3::new(0.0, vy, 0.0);
            if impact > config.fall_damage_speed {
                let damage = (impact - config.fall_damage_speed) * FALL_DAMAGE_PER_SPEED;
                combatants.health[i] = (combatants.health[i] - damage).max(0.0);
                trace!(?id, impact, damage, "hard landing");
            }
            let resume = combatants.resume_state[i];
            combatants.enter_state(id, resume);
            return StepOutcome::Landed;
        }
        CombatState::Frozen => {
            combatants.velocity[i] = Vec3::ZERO;
            combatants.actual_velocity[i] = Vec3::ZERO;
            return StepOutcome::Idle;
        }
        _ => {}
    }

    let (accel, decel) = config.accel_rates(combatants.posture[i]);
    let mut target = planar(combatants.velocity[i]);
    if combatants.state[i] == CombatState::Downed {
        target = crate::math::clamp_length(target, config.speed_prone_sneak);
    }
    let current = planar(combatants.actual_velocity[i]);
    let eased = integrate_velocity(current, target, accel, decel, dt);
    let (mut v, facing) = limit_turn(eased, combatants.facing[i], config.turn_rate * dt);
    if v.length() < config.dead_band {
        v = Vec2::ZERO;
    }

    if v == Vec2::ZERO {
        combatants.actual_velocity[i] = Vec3::ZERO;
        // Stationary shooters turn toward their aim point.
        if combatants.target[i].is_some() {
            let aim = planar(combatants.aim_point[i]) - planar(pos);
            if aim.length_squared() > EPSILON {
                let delta = wrap_angle(heading(aim) - combatants.facing[i])
                    .clamp(-config.turn_rate * dt, config.turn_rate * dt);
                combatants.facing[i] = wrap_angle(combatants.facing[i] + delta);
            }
        }
        settle_on_ground(combatants, links, config, i);
        return StepOutcome::Idle;
    }
    combatants.facing[i] = facing;

    let next = clamp_to_world(pos + lift(v * dt, 0.0), config);
    let ground = links.ground_height(next.x, next.z, pos.y);
    let rise = ground - pos.y;

    let outcome = if rise <= STEP_HEIGHT {
        if -rise > config.vault_height {
            // Off a ledge.
            combatants.position[i] = Vec3::new(next.x, pos.y, next.z);
            combatants.actual_velocity[i] = lift(v, 0.0);
            combatants.enter_state(id, CombatState::Falling);
            return StepOutcome::Fell;
        }
        combatants.position[i] = Vec3::new(next.x, ground, next.z);
        StepOutcome::Moved
    } else if rise <= config.vault_height {
        v *= VAULT_SPEED_FACTOR;
        let vaulted = clamp_to_world(pos + lift(v * dt, 0.0), config);
        let g = links.ground_height(vaulted.x, vaulted.z, pos.y);
        combatants.position[i] = Vec3::new(vaulted.x, g.max(pos.y), vaulted.z);
        StepOutcome::Vaulted
    } else if rise <= config.climb_height && combatants.climb_cooldown[i] <= 0.0 {
        combatants.climb_target[i] = ground;
        combatants.climb_timer[i] = 0.0;
        combatants.actual_velocity[i] = Vec3::ZERO;
        combatants.facing[i] = heading(normalize_or(v, from_heading(facing)));
        combatants.enter_state(id, CombatState::Climbing);
        return StepOutcome::StartedClimb;
    } else {
        // Slide along whichever axis is still open.
        let mut slid = None;
        for axis in [Vec2::new(v.x, 0.0), Vec2::new(0.0, v.y)] {
            if axis.length_squared() < EPSILON {
                continue;
            }
            let p = clamp_to_world(pos + lift(axis * dt, 0.0), config);
            let g = links.ground_height(p.x, p.z, pos.y);
            if (g - pos.y).abs() <= STEP_HEIGHT {
                slid = Some((Vec3::new(p.x, g, p.z), axis));
                break;
            }
        }
        match slid {
            Some((p, axis)) => {
                combatants.position[i] = p;
                v = axis;
            }
            None => v = Vec2::ZERO,
        }
        StepOutcome::Blocked
    };

    combatants.actual_velocity[i] = lift(v, 0.0);
    settle_on_ground(combatants, links, config, i);
    outcome
}

/// Re-clamp to the ground and push out of solid geometry.
fn settle_on_ground(combatants: &mut Combatants, links: &WorldLinks, config: &SimConfig, i: usize) {
    let pos = combatants.position[i];
    let ground = links.ground_height(pos.x, pos.z, pos.y);
    let settled = Vec3::new(pos.x, ground, pos.z);
    let embedded = ground - pos.y > config.vault_height
        || links.is_solid(links.voxel_at(settled + Vec3::Y * BODY_PROBE));
    combatants.position[i] = if embedded {
        push_out(links, config, pos).unwrap_or(settled)
    } else {
        settled
    };
}

/// Refresh per-combatant cover against the current threat direction.
fn refresh_cover(combatants: &mut Combatants, links: &WorldLinks, i: usize) {
    let threat = combatants.threat_dir[i];
    combatants.cover[i] = if threat.length_squared() > EPSILON {
        links.cover_value(combatants.position[i], threat)
    } else {
        0.0
    };
}

pub fn movement_system(
    dt: Res<DeltaTime>,
    tick: Res<SimTick>,
    config: Res<SimConfig>,
    links: Res<WorldLinks>,
    grid: Res<SpatialGrid>,
    mut combatants: ResMut<Combatants>,
    mut counters: ResMut<TickCounters>,
) {
    let delta = dt.0;
    let ids: Vec<EntityId> = combatants.alive_ids().collect();
    for id in ids {
        let outcome = step_body(&mut combatants, &links, &config, id, delta);
        if outcome != StepOutcome::Idle && outcome != StepOutcome::Moved {
            trace!(?id, ?outcome, "locomotion");
        }
        let i = id.index();
        if combatants.health[i] <= 0.0 {
            combatants.kill(id, tick.0);
            counters.deaths += 1;
            apply_death_shock(&mut combatants, &grid, &config, id, None);
            continue;
        }

        // Settle time counts while slow enough to shoot.
        let speed = planar(combatants.actual_velocity[i]).length();
        if speed <= config.move_fire_speed {
            combatants.settle_timer[i] += delta;
        } else {
            combatants.settle_timer[i] = 0.0;
            let weapon = combatants.role[i].weapon();
            combatants.deploy_timer[i] = weapon.deploy_time;
        }
        if speed <= config.move_fire_speed && combatants.deploy_timer[i] > 0.0 {
            combatants.deploy_timer[i] = (combatants.deploy_timer[i] - delta).max(0.0);
        }
        refresh_cover(&mut combatants, &links, i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::SpawnParams;
    use crate::terrain::{Material, VoxelTerrain};
    use std::sync::Arc;

    fn walker(x: f32, y: f32, vx: f32) -> Combatants {
        let mut c = Combatants::with_capacity(2);
        c.spawn(SpawnParams::new(Team::Blue, Role::Rifleman, 0, Vec3::new(x, y, 0.0)), 0)
            .unwrap();
        c.velocity[0] = Vec3::new(vx, 0.0, 0.0);
        c.actual_velocity[0] = Vec3::new(vx, 0.0, 0.0);
        c
    }

    fn links(terrain: VoxelTerrain) -> WorldLinks {
        WorldLinks {
            terrain: Some(Arc::new(terrain)),
            ..Default::default()
        }
    }

    #[test]
    fn test_velocity_eases_toward_target() {
        let v = integrate_velocity(Vec2::ZERO, Vec2::new(4.0, 0.0), 6.0, 10.0, 0.1);
        assert!(v.x > 0.0 && v.x < 4.0);
        let slowing = integrate_velocity(Vec2::new(4.0, 0.0), Vec2::ZERO, 6.0, 10.0, 0.1);
        // Deceleration is the faster rate.
        assert!(4.0 - slowing.x > v.x);
    }

    #[test]
    fn test_turn_rate_is_bounded() {
        let (v, facing) = limit_turn(Vec2::new(0.0, 2.0), 0.0, 0.2);
        assert!((facing - 0.2).abs() < 1e-5);
        assert!((v.length() - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_flat_ground_moves() {
        let mut c = walker(0.0, 0.0, 2.0);
        let config = SimConfig::default();
        let out = step_body(&mut c, &WorldLinks::default(), &config, EntityId(0), 0.1);
        assert_eq!(out, StepOutcome::Moved);
        assert!((c.position[0].x - 0.2).abs() < 1e-4);
    }

    #[test]
    fn test_dead_band_snaps_to_zero() {
        let mut c = walker(0.0, 0.0, 0.01);
        let config = SimConfig::default();
        let out = step_body(&mut c, &WorldLinks::default(), &config, EntityId(0), 0.1);
        assert_eq!(out, StepOutcome::Idle);
        assert_eq!(c.actual_velocity[0], Vec3::ZERO);
    }

    #[test]
    fn test_frozen_does_not_move() {
        let mut c = walker(0.0, 0.0, 2.0);
        c.state[0] = CombatState::Frozen;
        let config = SimConfig::default();
        step_body(&mut c, &WorldLinks::default(), &config, EntityId(0), 0.1);
        assert_eq!(c.position[0], Vec3::ZERO);
        assert_eq!(c.actual_velocity[0], Vec3::ZERO);
    }

    #[test]
    fn test_low_step_is_vaulted() {
        let mut terrain = VoxelTerrain::flat(64, 64, 0.5, 0);
        terrain.add_block(Vec2::new(0.5, -4.0), Vec2::new(3.0, 4.0), 1, Material::Brick);
        let links = links(terrain);
        let mut c = walker(0.4, 0.0, 2.0);
        let out = step_body(&mut c, &links, &SimConfig::default(), EntityId(0), 0.1);
        assert_eq!(out, StepOutcome::Vaulted);
        assert!((c.position[0].y - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_mid_wall_is_climbed() {
        let mut terrain = VoxelTerrain::flat(64, 64, 1.0, 0);
        terrain.add_block(Vec2::new(1.0, -4.0), Vec2::new(4.0, 4.0), 2, Material::Concrete);
        let links = links(terrain);
        let config = SimConfig::default();
        let mut c = walker(0.9, 0.0, 2.0);
        c.state[0] = CombatState::Moving;
        let out = step_body(&mut c, &links, &config, EntityId(0), 0.1);
        assert_eq!(out, StepOutcome::StartedClimb);
        assert_eq!(c.state[0], CombatState::Climbing);

        let mut last = out;
        for _ in 0..100 {
            last = step_body(&mut c, &links, &config, EntityId(0), 0.1);
            if last == StepOutcome::FinishedClimb {
                break;
            }
        }
        assert_eq!(last, StepOutcome::FinishedClimb);
        assert_eq!(c.state[0], CombatState::Moving);
        assert!((c.position[0].y - 2.0).abs() < 1e-4);
        assert!(c.climb_cooldown[0] > 0.0);
    }

    #[test]
    fn test_tall_wall_blocks() {
        let mut terrain = VoxelTerrain::flat(64, 64, 1.0, 0);
        terrain.add_block(Vec2::new(1.0, -4.0), Vec2::new(4.0, 4.0), 5, Material::Concrete);
        let links = links(terrain);
        let mut c = walker(0.9, 0.0, 2.0);
        let out = step_body(&mut c, &links, &SimConfig::default(), EntityId(0), 0.1);
        assert_eq!(out, StepOutcome::Blocked);
        assert!(c.position[0].x < 1.0);
    }

    #[test]
    fn test_ledge_fall_and_hard_landing() {
        let mut terrain = VoxelTerrain::flat(64, 64, 1.0, 0);
        terrain.add_block(Vec2::new(-4.0, -4.0), Vec2::new(0.9, 4.0), 8, Material::Concrete);
        let links = links(terrain);
        let config = SimConfig::default();
        let mut c = walker(0.9, 8.0, 2.0);
        c.state[0] = CombatState::Moving;
        assert_eq!(step_body(&mut c, &links, &config, EntityId(0), 0.1), StepOutcome::Fell);
        assert_eq!(c.state[0], CombatState::Falling);

        let mut last = StepOutcome::Fell;
        for _ in 0..100 {
            last = step_body(&mut c, &links, &config, EntityId(0), 1.0 / 30.0);
            if last == StepOutcome::Landed {
                break;
            }
        }
        assert_eq!(last, StepOutcome::Landed);
        assert_eq!(c.state[0], CombatState::Moving);
        assert_eq!(c.position[0].y, 0.0);
        // 8 m drop lands faster than the damage threshold.
        assert!(c.health[0] < 1.0);
    }

    #[test]
    fn test_embedded_body_is_pushed_out() {
        let mut terrain = VoxelTerrain::flat(64, 64, 1.0, 0);
        terrain.set_column(0.5, 0.5, 3, Material::Brick);
        let links = links(terrain);
        let mut c = walker(0.5, 0.0, 0.0);
        c.position[0].z = 0.5;
        step_body(&mut c, &links, &SimConfig::default(), EntityId(0), 0.1);
        assert_ne!((c.position[0].x, c.position[0].z), (0.5, 0.5));
        assert_eq!(c.position[0].y, 0.0);
    }
}
