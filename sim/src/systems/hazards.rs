//! Timed area clouds left by smoke and gas payloads.
//!
//! Smoke blocks sight lines for perception. Gas hurts and suppresses every
//! combatant inside it each tick.

use crate::config::SimConfig;
use crate::entity::{Combatants, EntityId};
use crate::math::point_segment_distance;
use crate::spatial::SpatialGrid;
use crate::systems::diagnostics::TickCounters;
use crate::systems::morale::apply_death_shock;
use crate::systems::suppression::add_suppression;
use crate::systems::time::{DeltaTime, SimTick};
use bevy_ecs::prelude::*;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HazardKind {
    Smoke,
    Gas,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hazard {
    pub kind: HazardKind,
    pub center: Vec3,
    pub radius: f32,
    pub remaining: f32,
}

#[derive(Resource, Debug, Clone, Default)]
pub struct Hazards {
    pub clouds: Vec<Hazard>,
}

impl Hazards {
    pub fn spawn(&mut self, kind: HazardKind, center: Vec3, radius: f32, duration: f32) {
        if radius <= 0.0 || duration <= 0.0 {
            return;
        }
        trace!(?kind, ?center, radius, duration, "hazard cloud");
        self.clouds.push(Hazard {
            kind,
            center,
            radius,
            remaining: duration,
        });
    }

    /// A smoke cloud crosses the segment.
    pub fn blocks_sight(&self, from: Vec3, to: Vec3) -> bool {
        self.clouds.iter().any(|h| {
            h.kind == HazardKind::Smoke && point_segment_distance(h.center, from, to).0 < h.radius
        })
    }

    /// Summed gas intensity at a point, 1 at a cloud center.
    pub fn gas_exposure(&self, p: Vec3) -> f32 {
        self.clouds
            .iter()
            .filter(|h| h.kind == HazardKind::Gas)
            .map(|h| {
                let d = h.center.distance(p);
                if d < h.radius {
                    1.0 - d / h.radius
                } else {
                    0.0
                }
            })
            .sum()
    }

    pub fn advance(&mut self, dt: f32) {
        for h in &mut self.clouds {
            h.remaining -= dt;
        }
        self.clouds.retain(|h| h.remaining > 0.0);
    }
}

/// Applies gas damage and ages every cloud.
///
/// Gas is a steady drain, so it skips the per-hit morale shock; a gas death
/// still shakes nearby allies.
pub fn hazard_system(
    dt: Res<DeltaTime>,
    tick: Res<SimTick>,
    config: Res<SimConfig>,
    grid: Res<SpatialGrid>,
    mut hazards: ResMut<Hazards>,
    mut combatants: ResMut<Combatants>,
    mut counters: ResMut<TickCounters>,
) {
    if hazards.clouds.iter().any(|h| h.kind == HazardKind::Gas) {
        let ids: Vec<usize> = combatants.alive_ids().map(|id| id.index()).collect();
        for i in ids {
            let exposure = hazards.gas_exposure(combatants.position[i]).min(1.0);
            if exposure <= 0.0 {
                continue;
            }
            combatants.health[i] -= config.gas_damage_per_second * exposure * dt.0;
            add_suppression(&mut combatants, i, 0.5 * exposure * dt.0);
            if combatants.health[i] <= 0.0 {
                let id = EntityId(i as u32);
                trace!(?id, "killed by gas");
                combatants.kill(id, tick.0);
                apply_death_shock(&mut combatants, &grid, &config, id, None);
                counters.deaths += 1;
            }
        }
    }
    hazards.advance(dt.0);
}
