//! Reciprocal velocity obstacles.
//!
//! Every combatant turns its nearest neighbors and nearby walls into
//! half-plane constraints on its next velocity, then solves a small 2D
//! linear program for the velocity closest to what steering asked for.
//! The construction and the three-stage solver follow the usual RVO2
//! formulation: the allowed side of a [`Line`] lies to the right of its
//! direction.

use super::gather;
use crate::components::CombatState;
use crate::config::SimConfig;
use crate::entity::{Combatants, EntityId};
use crate::links::WorldLinks;
use crate::math::{det, from_heading, normalize_or, planar, DEFAULT_DIR, EPSILON};
use crate::spatial::SpatialGrid;
use crate::systems::steering::DesiredVelocities;
use crate::systems::time::DeltaTime;
use bevy_ecs::prelude::*;
use glam::{Vec2, Vec3};
use smallvec::SmallVec;
use std::f32::consts::TAU;

/// Wall probes per agent.
pub const WALL_PROBES: usize = 8;
/// Responsibility a moving squad-mate takes for a shared conflict.
const SQUAD_SHARE: f32 = 0.5;
/// Speed below which a neighbor counts as stationary.
const STATIONARY_SPEED: f32 = 0.1;

pub type Lines = SmallVec<[Line; 24]>;

/// Directed line bounding a half-plane of permitted velocities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub point: Vec2,
    pub direction: Vec2,
}

/// The agent being solved for.
#[derive(Debug, Clone, Copy)]
pub struct Agent {
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f32,
    pub max_speed: f32,
}

/// Another agent as seen by the solver.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f32,
    /// Share of the avoidance this agent takes on, 0..1.
    pub responsibility: f32,
}

/// Constraint from one neighbor.
pub fn agent_line(agent: &Agent, other: &Neighbor, time_horizon: f32, dt: f32) -> Line {
    let inv_horizon = 1.0 / time_horizon.max(EPSILON);
    let rel_pos = other.position - agent.position;
    let rel_vel = agent.velocity - other.velocity;
    let dist_sq = rel_pos.length_squared();
    let combined = agent.radius + other.radius;
    let combined_sq = combined * combined;

    let (direction, u) = if dist_sq > combined_sq {
        // Vector from the cutoff center to the relative velocity.
        let w = rel_vel - rel_pos * inv_horizon;
        let w_len_sq = w.length_squared();
        let dot = w.dot(rel_pos);
        if dot < 0.0 && dot * dot > combined_sq * w_len_sq {
            // Project on the cutoff circle.
            let w_len = w_len_sq.sqrt().max(EPSILON);
            let unit_w = w / w_len;
            (
                Vec2::new(unit_w.y, -unit_w.x),
                unit_w * (combined * inv_horizon - w_len),
            )
        } else {
            // Project on the nearer leg.
            let leg = (dist_sq - combined_sq).sqrt();
            let direction = if det(rel_pos, w) > 0.0 {
                Vec2::new(
                    rel_pos.x * leg - rel_pos.y * combined,
                    rel_pos.x * combined + rel_pos.y * leg,
                ) / dist_sq
            } else {
                -Vec2::new(
                    rel_pos.x * leg + rel_pos.y * combined,
                    -rel_pos.x * combined + rel_pos.y * leg,
                ) / dist_sq
            };
            (direction, direction * rel_vel.dot(direction) - rel_vel)
        }
    } else {
        // Already overlapping: resolve within one step.
        let inv_step = 1.0 / dt.max(EPSILON);
        let w = rel_vel - rel_pos * inv_step;
        let w_len = w.length();
        let unit_w = normalize_or(w, DEFAULT_DIR);
        (
            Vec2::new(unit_w.y, -unit_w.x),
            unit_w * (combined * inv_step - w_len),
        )
    };

    Line {
        point: agent.velocity + u * other.responsibility,
        direction,
    }
}

/// Constraint keeping the velocity from reaching a wall `distance` away
/// along `dir` within `horizon` seconds.
pub fn wall_line(dir: Vec2, distance: f32, radius: f32, horizon: f32) -> Line {
    let dir = normalize_or(dir, DEFAULT_DIR);
    let reach = (distance - radius).max(0.0) / horizon.max(EPSILON);
    Line {
        point: dir * reach,
        direction: Vec2::new(-dir.y, dir.x),
    }
}

fn linear_program1(
    lines: &[Line],
    line_no: usize,
    radius: f32,
    opt_velocity: Vec2,
    direction_opt: bool,
    result: &mut Vec2,
) -> bool {
    let line = lines[line_no];
    let dot = line.point.dot(line.direction);
    let discriminant = dot * dot + radius * radius - line.point.length_squared();
    if discriminant < 0.0 {
        // The speed disc misses this line entirely.
        return false;
    }
    let sqrt_disc = discriminant.sqrt();
    let mut t_left = -dot - sqrt_disc;
    let mut t_right = -dot + sqrt_disc;

    for other in &lines[..line_no] {
        let denominator = det(line.direction, other.direction);
        let numerator = det(other.direction, line.point - other.point);
        if denominator.abs() <= EPSILON {
            // Parallel lines.
            if numerator < 0.0 {
                return false;
            }
            continue;
        }
        let t = numerator / denominator;
        if denominator >= 0.0 {
            t_right = t_right.min(t);
        } else {
            t_left = t_left.max(t);
        }
        if t_left > t_right {
            return false;
        }
    }

    let t = if direction_opt {
        if opt_velocity.dot(line.direction) > 0.0 {
            t_right
        } else {
            t_left
        }
    } else {
        line.direction
            .dot(opt_velocity - line.point)
            .clamp(t_left, t_right)
    };
    *result = line.point + line.direction * t;
    true
}

/// Returns the index of the first line that could not be satisfied, or
/// `lines.len()` on success.
fn linear_program2(
    lines: &[Line],
    radius: f32,
    opt_velocity: Vec2,
    direction_opt: bool,
    result: &mut Vec2,
) -> usize {
    *result = if direction_opt {
        opt_velocity * radius
    } else if opt_velocity.length_squared() > radius * radius {
        normalize_or(opt_velocity, DEFAULT_DIR) * radius
    } else {
        opt_velocity
    };

    for i in 0..lines.len() {
        if det(lines[i].direction, lines[i].point - *result) > 0.0 {
            let previous = *result;
            if !linear_program1(lines, i, radius, opt_velocity, direction_opt, result) {
                *result = previous;
                return i;
            }
        }
    }
    lines.len()
}

/// Infeasible case: minimize the largest penetration of the agent lines
/// while still honoring the first `fixed` lines (walls).
fn linear_program3(lines: &[Line], fixed: usize, begin: usize, radius: f32, result: &mut Vec2) {
    let mut distance = 0.0;
    for i in begin..lines.len() {
        if det(lines[i].direction, lines[i].point - *result) <= distance {
            continue;
        }
        let mut projected: Lines = lines[..fixed].iter().copied().collect();
        for j in fixed..i {
            let determinant = det(lines[i].direction, lines[j].direction);
            let point = if determinant.abs() <= EPSILON {
                if lines[i].direction.dot(lines[j].direction) > 0.0 {
                    // Same direction; line j adds nothing.
                    continue;
                }
                (lines[i].point + lines[j].point) * 0.5
            } else {
                lines[i].point
                    + lines[i].direction
                        * (det(lines[j].direction, lines[i].point - lines[j].point) / determinant)
            };
            projected.push(Line {
                point,
                direction: normalize_or(lines[j].direction - lines[i].direction, DEFAULT_DIR),
            });
        }

        let previous = *result;
        let opt = Vec2::new(-lines[i].direction.y, lines[i].direction.x);
        if linear_program2(&projected, radius, opt, true, result) < projected.len() {
            // Only floating-point error can get here; keep the last result.
            *result = previous;
        }
        distance = det(lines[i].direction, lines[i].point - *result);
    }
}

/// Velocity within `max_speed` closest to `preferred` that satisfies
/// `lines`. The first `fixed` lines are never relaxed.
pub fn solve(lines: &[Line], fixed: usize, max_speed: f32, preferred: Vec2) -> Vec2 {
    let mut result = Vec2::ZERO;
    let failed = linear_program2(lines, max_speed, preferred, false, &mut result);
    if failed < lines.len() {
        linear_program3(lines, fixed, failed, max_speed, &mut result);
    }
    result
}

/// Blend part of the original intent back in when avoidance nearly
/// stopped the agent.
pub fn unstall(solved: Vec2, desired: Vec2, max_speed: f32, config: &SimConfig) -> Vec2 {
    let want = desired.length();
    if want < EPSILON || solved.length() >= want * config.orca_stall_ratio {
        return solved;
    }
    let blended = solved + desired * config.orca_stall_blend.clamp(0.0, 1.0);
    crate::math::clamp_length(blended, max_speed)
}

/// Distance to the first impassable column along `dir`, if any lies
/// within `probe`.
pub fn wall_distance(links: &WorldLinks, config: &SimConfig, pos: Vec3, dir: Vec2, probe: f32) -> Option<f32> {
    if links.terrain.is_none() {
        return None;
    }
    let step = (links.voxel_size() * 0.5).max(0.1);
    let here = planar(pos);
    let mut d = step;
    while d <= probe {
        let p = here + dir * d;
        let rise = links.ground_height(p.x, p.y, pos.y) - pos.y;
        if rise > config.climb_height {
            return Some(d);
        }
        d += step;
    }
    None
}

/// Neighbor list for one combatant: nearest first, capped at the
/// configured count.
pub fn gather_neighbors(
    combatants: &Combatants,
    grid: &SpatialGrid,
    config: &SimConfig,
    id: EntityId,
) -> SmallVec<[Neighbor; 16]> {
    let i = id.index();
    let here = planar(combatants.position[i]);
    let mut found: SmallVec<[(f32, EntityId); 32]> = SmallVec::new();
    grid.for_each_in_radius(here, config.orca_neighbor_dist, |other, _, _, d_sq| {
        if other != id {
            found.push((d_sq, other));
        }
    });
    found.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    found.truncate(config.orca_max_neighbors.max(0.0) as usize);

    found
        .iter()
        .map(|&(_, other)| {
            let o = other.index();
            let velocity = planar(combatants.actual_velocity[o]);
            let squad_mate = combatants.team[o] == combatants.team[i]
                && combatants.squad[o] == combatants.squad[i];
            let responsibility = if squad_mate && velocity.length() > STATIONARY_SPEED {
                SQUAD_SHARE
            } else {
                1.0
            };
            Neighbor {
                position: planar(combatants.position[o]),
                velocity,
                radius: config.orca_agent_radius,
                responsibility,
            }
        })
        .collect()
}

/// Resolve one combatant's velocity against neighbors and walls.
pub fn avoid(
    combatants: &Combatants,
    grid: &SpatialGrid,
    links: &WorldLinks,
    config: &SimConfig,
    desired: Vec2,
    dt: f32,
    id: EntityId,
) -> Vec2 {
    let i = id.index();
    if matches!(
        combatants.state[i],
        CombatState::Frozen | CombatState::Climbing | CombatState::Falling
    ) {
        return Vec2::ZERO;
    }
    let pos = combatants.position[i];
    let max_speed = desired
        .length()
        .max(config.speed(combatants.posture[i], combatants.mode[i]));
    let agent = Agent {
        position: planar(pos),
        velocity: planar(combatants.actual_velocity[i]),
        radius: config.orca_agent_radius,
        max_speed,
    };

    let mut lines = Lines::new();
    for k in 0..WALL_PROBES {
        let dir = from_heading(TAU * k as f32 / WALL_PROBES as f32);
        if let Some(d) = wall_distance(links, config, pos, dir, config.orca_wall_probe) {
            lines.push(wall_line(dir, d, agent.radius, config.orca_obstacle_horizon));
        }
    }
    let fixed = lines.len();
    for n in gather_neighbors(combatants, grid, config, id) {
        lines.push(agent_line(&agent, &n, config.orca_time_horizon, dt));
    }

    let solved = solve(&lines, fixed, agent.max_speed, desired);
    unstall(solved, desired, agent.max_speed, config)
}

pub fn orca_system(
    dt: Res<DeltaTime>,
    config: Res<SimConfig>,
    grid: Res<SpatialGrid>,
    links: Res<WorldLinks>,
    desired: Res<DesiredVelocities>,
    mut combatants: ResMut<Combatants>,
) {
    let ids: Vec<EntityId> = combatants.alive_ids().collect();
    let (store, grid_ref, links_ref, cfg, wants) = (&*combatants, &*grid, &*links, &*config, &*desired);
    let delta = dt.0;
    let solved = gather(&ids, |&id| {
        avoid(store, grid_ref, links_ref, cfg, wants.get(id), delta, id)
    });
    for (id, v) in ids.iter().zip(solved) {
        combatants.velocity[id.index()] = Vec3::new(v.x, 0.0, v.y);
    }
}
