//! Stigmergy field and flow field contracts.
//!
//! Both are owned outside the simulation. Writes go through `&self` so a
//! shared field can be handed to the simulation behind an `Arc`.

use crate::math::planar;
use glam::{Vec2, Vec3};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// Signal channels the combat core reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Danger,
    Suppression,
    Contact,
    Rally,
    Fear,
    Courage,
    SafeRoute,
    FlankOpportunity,
    /// Externally driven attractor used only by steering.
    Strategic,
}

impl Channel {
    pub const ALL: [Channel; 9] = [
        Channel::Danger,
        Channel::Suppression,
        Channel::Contact,
        Channel::Rally,
        Channel::Fear,
        Channel::Courage,
        Channel::SafeRoute,
        Channel::FlankOpportunity,
        Channel::Strategic,
    ];
}

pub trait Stigmergy: Send + Sync {
    fn sample(&self, pos: Vec3, channel: Channel) -> f32;

    /// Planar gradient pointing toward increasing signal.
    fn gradient(&self, pos: Vec3, channel: Channel) -> Vec2;

    fn deposit(&self, pos: Vec3, channel: Channel, amount: f32);

    /// Deposit with linear falloff out to `radius`.
    fn deposit_radius(&self, pos: Vec3, channel: Channel, amount: f32, radius: f32) {
        let _ = radius;
        self.deposit(pos, channel, amount);
    }

    /// Deposit along a cone from `origin` in direction `dir`.
    fn deposit_cone(
        &self,
        origin: Vec3,
        dir: Vec2,
        half_angle: f32,
        range: f32,
        channel: Channel,
        amount: f32,
    ) {
        let _ = half_angle;
        let mid = origin + Vec3::new(dir.x, 0.0, dir.y) * (range * 0.5);
        self.deposit(mid, channel, amount);
    }

    /// Deposit along the segment between two points.
    fn deposit_trail(&self, from: Vec3, to: Vec3, channel: Channel, amount: f32) {
        let steps = (from.distance(to) / 2.0).ceil().max(1.0) as usize;
        let per_step = amount / (steps + 1) as f32;
        for s in 0..=steps {
            self.deposit(from.lerp(to, s as f32 / steps as f32), channel, per_step);
        }
    }
}

/// Precomputed navigation directions toward the current objective.
pub trait FlowField: Send + Sync {
    /// Unit planar direction at a position, if the field covers it.
    fn direction(&self, pos: Vec3) -> Option<Vec2>;
}

/// Sparse grid-backed stigmergy field.
#[derive(Debug)]
pub struct GridField {
    pub cell_size: f32,
    cells: RwLock<HashMap<(i32, i32, Channel), f32>>,
}

impl GridField {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: cell_size.max(0.1),
            cells: RwLock::new(HashMap::new()),
        }
    }

    #[inline]
    fn cell(&self, p: Vec2) -> (i32, i32) {
        (
            (p.x / self.cell_size).floor() as i32,
            (p.y / self.cell_size).floor() as i32,
        )
    }

    fn read_cell(&self, cx: i32, cz: i32, channel: Channel) -> f32 {
        self.cells
            .read()
            .map(|cells| cells.get(&(cx, cz, channel)).copied().unwrap_or(0.0))
            .unwrap_or(0.0)
    }

    fn add_cell(&self, cx: i32, cz: i32, channel: Channel, amount: f32) {
        if let Ok(mut cells) = self.cells.write() {
            let v = cells.entry((cx, cz, channel)).or_insert(0.0);
            *v = (*v + amount).max(0.0);
        }
    }

    /// Multiply every cell by `factor` and drop near-zero entries.
    pub fn decay(&self, factor: f32) {
        if let Ok(mut cells) = self.cells.write() {
            cells.retain(|_, v| {
                *v *= factor;
                *v > 1e-4
            });
        }
    }

    /// Number of non-empty cells across all channels.
    pub fn populated(&self) -> usize {
        self.cells.read().map(|c| c.len()).unwrap_or(0)
    }
}

impl Stigmergy for GridField {
    fn sample(&self, pos: Vec3, channel: Channel) -> f32 {
        let (cx, cz) = self.cell(planar(pos));
        self.read_cell(cx, cz, channel)
    }

    fn gradient(&self, pos: Vec3, channel: Channel) -> Vec2 {
        let (cx, cz) = self.cell(planar(pos));
        let dx = self.read_cell(cx + 1, cz, channel) - self.read_cell(cx - 1, cz, channel);
        let dz = self.read_cell(cx, cz + 1, channel) - self.read_cell(cx, cz - 1, channel);
        Vec2::new(dx, dz) / (2.0 * self.cell_size)
    }

    fn deposit(&self, pos: Vec3, channel: Channel, amount: f32) {
        let (cx, cz) = self.cell(planar(pos));
        self.add_cell(cx, cz, channel, amount);
    }

    fn deposit_radius(&self, pos: Vec3, channel: Channel, amount: f32, radius: f32) {
        let center = planar(pos);
        let reach = (radius / self.cell_size).ceil() as i32;
        let (cx, cz) = self.cell(center);
        for dz in -reach..=reach {
            for dx in -reach..=reach {
                let cell_center =
                    Vec2::new((cx + dx) as f32 + 0.5, (cz + dz) as f32 + 0.5) * self.cell_size;
                let d = cell_center.distance(center);
                if d <= radius.max(self.cell_size * 0.5) {
                    let falloff = 1.0 - (d / radius.max(1e-3)).min(1.0);
                    self.add_cell(cx + dx, cz + dz, channel, amount * falloff.max(0.25));
                }
            }
        }
    }
}

/// Flow field that points every position at one goal.
#[derive(Debug, Clone, Copy)]
pub struct PointFlow {
    pub goal: Vec2,
}

impl FlowField for PointFlow {
    fn direction(&self, pos: Vec3) -> Option<Vec2> {
        let to_goal = self.goal - planar(pos);
        (to_goal.length_squared() > 1e-6).then(|| to_goal.normalize())
    }
}
