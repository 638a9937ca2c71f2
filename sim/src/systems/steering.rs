//! Context steering.
//!
//! Eight evenly spaced direction slots collect interest (goal, flow field,
//! attracting stigmergy channels) and danger (the danger channel, map
//! borders, terrain that cannot be crossed). Both rings are blurred, and
//! the chosen heading is the slot maximizing `interest * (1 - danger)`,
//! refined between neighboring slots by fitting a parabola.

use super::gather;
use crate::components::*;
use crate::config::SimConfig;
use crate::entity::{Combatants, EntityId};
use crate::links::WorldLinks;
use crate::math::{from_heading, lift, normalize_or, planar, EPSILON};
use crate::stigmergy::Channel;
use bevy_ecs::prelude::*;
use glam::Vec2;
use std::f32::consts::TAU;

pub const SLOTS: usize = 8;
const BLUR: [f32; 3] = [0.25, 0.5, 0.25];
/// Interest below this resolves to standing still.
const MIN_INTEREST: f32 = 1e-3;
/// Arrival slowdown starts this many arrive radii out.
const SLOWDOWN_RADII: f32 = 3.0;
/// Danger stops counting past this distance of sight toward its source.
const DANGER_SIGHT: f32 = 8.0;
/// Share of crossing danger given to terrain the unit could still climb.
const CLIMB_DANGER: f32 = 0.3;

/// Desired planar velocity per slot, written by steering and read by
/// avoidance.
#[derive(Resource, Debug, Clone, Default)]
pub struct DesiredVelocities(pub Vec<Vec2>);

impl DesiredVelocities {
    pub fn with_capacity(capacity: usize) -> Self {
        Self(vec![Vec2::ZERO; capacity])
    }

    #[inline]
    pub fn get(&self, id: EntityId) -> Vec2 {
        self.0.get(id.index()).copied().unwrap_or(Vec2::ZERO)
    }
}

#[inline]
pub fn slot_direction(slot: usize) -> Vec2 {
    from_heading(TAU * slot as f32 / SLOTS as f32)
}

/// Interest and danger rings for one combatant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContextMap {
    pub interest: [f32; SLOTS],
    pub danger: [f32; SLOTS],
}

impl ContextMap {
    /// Spread `weight` over the slots facing `dir`.
    pub fn add_interest(&mut self, dir: Vec2, weight: f32) {
        if weight <= 0.0 || dir.length_squared() < EPSILON {
            return;
        }
        let dir = dir.normalize();
        for (k, slot) in self.interest.iter_mut().enumerate() {
            *slot += slot_direction(k).dot(dir).max(0.0) * weight;
        }
    }

    /// Raise danger toward `dir`; danger never stacks past the strongest source.
    pub fn add_danger(&mut self, dir: Vec2, weight: f32) {
        if weight <= 0.0 || dir.length_squared() < EPSILON {
            return;
        }
        let dir = dir.normalize();
        for (k, slot) in self.danger.iter_mut().enumerate() {
            let v = slot_direction(k).dot(dir).max(0.0) * weight;
            *slot = slot.max(v);
        }
    }

    pub fn set_slot_danger(&mut self, slot: usize, value: f32) {
        self.danger[slot] = self.danger[slot].max(value);
    }

    fn blur_ring(ring: &[f32; SLOTS]) -> [f32; SLOTS] {
        let mut out = [0.0; SLOTS];
        for (k, v) in out.iter_mut().enumerate() {
            let left = ring[(k + SLOTS - 1) % SLOTS];
            let right = ring[(k + 1) % SLOTS];
            *v = BLUR[0] * left + BLUR[1] * ring[k] + BLUR[2] * right;
        }
        out
    }

    pub fn blur(&mut self) {
        self.interest = Self::blur_ring(&self.interest);
        self.danger = Self::blur_ring(&self.danger);
    }

    /// Best direction, or `None` when nothing is worth moving toward.
    pub fn resolve(&self) -> Option<Vec2> {
        let mut masked = [0.0; SLOTS];
        for k in 0..SLOTS {
            masked[k] = self.interest[k] * (1.0 - self.danger[k].clamp(0.0, 1.0));
        }
        let mut best = 0;
        for k in 1..SLOTS {
            if masked[k] > masked[best] {
                best = k;
            }
        }
        let peak = masked[best];
        if peak <= MIN_INTEREST {
            return None;
        }
        let left = masked[(best + SLOTS - 1) % SLOTS];
        let right = masked[(best + 1) % SLOTS];
        // Vertex of the parabola through the three samples.
        let curvature = left - 2.0 * peak + right;
        let offset = if curvature < -EPSILON {
            (0.5 * (left - right) / curvature).clamp(-0.5, 0.5)
        } else {
            0.0
        };
        Some(from_heading(TAU * (best as f32 + offset) / SLOTS as f32))
    }
}

/// Build and resolve the context map for one combatant.
pub fn steer(
    combatants: &Combatants,
    links: &WorldLinks,
    config: &SimConfig,
    id: EntityId,
) -> Vec2 {
    let i = id.index();
    let state = combatants.state[i];
    if matches!(
        state,
        CombatState::Frozen | CombatState::Dead | CombatState::Climbing | CombatState::Falling
    ) {
        return Vec2::ZERO;
    }
    let Some(goal) = combatants.goal[i] else {
        return Vec2::ZERO;
    };

    let pos = combatants.position[i];
    let here = planar(pos);
    let to_goal = planar(goal) - here;
    let distance = to_goal.length();
    if distance <= config.steer_arrive_radius {
        return Vec2::ZERO;
    }

    let mut map = ContextMap::default();
    map.add_interest(to_goal, config.steer_goal_weight);
    if let Some(flow) = links.flow_direction(pos) {
        map.add_interest(flow, config.steer_flow_weight);
    }
    map.add_interest(links.gradient(pos, Channel::SafeRoute), config.steer_stigmergy_weight);
    match state {
        CombatState::Retreating => {
            map.add_interest(links.gradient(pos, Channel::Rally), config.steer_stigmergy_weight)
        }
        CombatState::Flanking => map.add_interest(
            links.gradient(pos, Channel::FlankOpportunity),
            config.steer_stigmergy_weight,
        ),
        _ => {}
    }
    map.add_interest(links.gradient(pos, Channel::Strategic), config.steer_strategic_weight);

    // Danger only counts when the unit can see toward its source.
    let danger = links.gradient(pos, Channel::Danger);
    if danger.length_squared() > EPSILON {
        let dir = danger.normalize();
        let eye = combatants.eye(id);
        let probe = eye + lift(dir * DANGER_SIGHT, 0.0);
        if links.check_los(eye, probe) {
            map.add_danger(dir, (danger.length() * config.steer_danger_weight).min(1.0));
        }
    }

    for k in 0..SLOTS {
        let dir = slot_direction(k);
        let ahead = here + dir * config.steer_border_margin;
        let over_x = (ahead.x.abs() - config.world_half_width).max(0.0);
        let over_z = (ahead.y.abs() - config.world_half_height).max(0.0);
        let over = over_x.max(over_z);
        if over > 0.0 {
            map.set_slot_danger(k, (over / config.steer_border_margin.max(EPSILON)).min(1.0));
        }

        let probe = here + dir * config.steer_lookahead;
        let rise = links.ground_height(probe.x, probe.y, pos.y) - pos.y;
        if rise > config.climb_height {
            map.set_slot_danger(k, 1.0);
        } else if rise > config.vault_height {
            map.set_slot_danger(k, CLIMB_DANGER);
        }
    }

    map.blur();
    let Some(dir) = map.resolve() else {
        return Vec2::ZERO;
    };

    let mode = if state == CombatState::Downed {
        MovementMode::Sneak
    } else {
        combatants.mode[i]
    };
    let posture = if state == CombatState::Downed {
        Posture::Prone
    } else {
        combatants.posture[i]
    };
    let mut speed = config.speed(posture, mode);
    let slowdown = config.steer_arrive_radius * SLOWDOWN_RADII;
    if distance < slowdown {
        speed *= distance / slowdown;
    }
    normalize_or(dir, Vec2::ZERO) * speed
}

pub fn steering_system(
    config: Res<SimConfig>,
    links: Res<WorldLinks>,
    combatants: Res<Combatants>,
    mut desired: ResMut<DesiredVelocities>,
) {
    if desired.0.len() < combatants.len() {
        desired.0.resize(combatants.len(), Vec2::ZERO);
    }
    let ids: Vec<EntityId> = combatants.alive_ids().collect();
    let (store, links, cfg) = (&*combatants, &*links, &*config);
    let velocities = gather(&ids, |&id| steer(store, links, cfg, id));
    for v in desired.0.iter_mut() {
        *v = Vec2::ZERO;
    }
    for (id, v) in ids.iter().zip(velocities) {
        desired.0[id.index()] = v;
    }
}
