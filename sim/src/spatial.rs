//! Uniform grid over the XZ plane for neighbor queries.
//!
//! The grid is rebuilt from scratch every tick with a counting sort into
//! flat arrays sized for the full combatant capacity, so a rebuild never
//! allocates once the grid has been created. Cells are keyed by
//! `(floor((x + half_w) / cell), floor((z + half_h) / cell))`; positions
//! outside the world bounds are clamped into the border cells.

use crate::components::Team;
use crate::config::SimConfig;
use crate::entity::{Combatants, EntityId};
use crate::math::planar;
use bevy_ecs::prelude::*;
use glam::Vec2;
use tracing::debug;

#[derive(Resource, Debug, Clone)]
pub struct SpatialGrid {
    pub cell_size: f32,
    half_width: f32,
    half_height: f32,
    cols: usize,
    rows: usize,
    /// Start offset of each cell in `ids`; one extra trailing entry.
    cell_start: Vec<u32>,
    /// Scratch counts, reused as write cursors during a rebuild.
    cursor: Vec<u32>,
    ids: Vec<EntityId>,
    points: Vec<Vec2>,
    teams: Vec<Team>,
}

impl Default for SpatialGrid {
    fn default() -> Self {
        let config = SimConfig::default();
        Self::new(
            config.world_half_width,
            config.world_half_height,
            config.spatial_cell_size,
            1024,
        )
    }
}

impl SpatialGrid {
    pub fn new(half_width: f32, half_height: f32, cell_size: f32, capacity: usize) -> Self {
        let cell_size = cell_size.max(0.5);
        let cols = ((2.0 * half_width / cell_size).ceil() as usize).max(1);
        let rows = ((2.0 * half_height / cell_size).ceil() as usize).max(1);
        Self {
            cell_size,
            half_width,
            half_height,
            cols,
            rows,
            cell_start: vec![0; cols * rows + 1],
            cursor: vec![0; cols * rows],
            ids: Vec::with_capacity(capacity),
            points: Vec::with_capacity(capacity),
            teams: Vec::with_capacity(capacity),
        }
    }

    /// Grid layout matches the given configuration.
    pub fn matches(&self, config: &SimConfig) -> bool {
        self.half_width == config.world_half_width
            && self.half_height == config.world_half_height
            && self.cell_size == config.spatial_cell_size.max(0.5)
    }

    #[inline]
    pub fn dims(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    /// Unclamped cell coordinates of a planar point.
    #[inline]
    pub fn world_to_cell(&self, p: Vec2) -> (i32, i32) {
        (
            ((p.x + self.half_width) / self.cell_size).floor() as i32,
            ((p.y + self.half_height) / self.cell_size).floor() as i32,
        )
    }

    #[inline]
    fn clamp_cell(&self, (cx, cz): (i32, i32)) -> (usize, usize) {
        (
            cx.clamp(0, self.cols as i32 - 1) as usize,
            cz.clamp(0, self.rows as i32 - 1) as usize,
        )
    }

    #[inline]
    fn cell_index(&self, p: Vec2) -> usize {
        let (cx, cz) = self.clamp_cell(self.world_to_cell(p));
        cz * self.cols + cx
    }

    /// Number of combatants bucketed by the last rebuild.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Re-bucket every alive combatant.
    pub fn rebuild(&mut self, combatants: &Combatants) {
        self.cursor.fill(0);
        let mut total = 0usize;
        for id in combatants.alive_ids() {
            let cell = self.cell_index(planar(combatants.position[id.index()]));
            self.cursor[cell] += 1;
            total += 1;
        }

        let mut running = 0u32;
        for (cell, count) in self.cursor.iter_mut().enumerate() {
            self.cell_start[cell] = running;
            running += *count;
            *count = self.cell_start[cell];
        }
        self.cell_start[self.cols * self.rows] = running;

        self.ids.clear();
        self.ids.resize(total, EntityId::INVALID);
        self.points.clear();
        self.points.resize(total, Vec2::ZERO);
        self.teams.clear();
        self.teams.resize(total, Team::Blue);

        // Ascending id iteration keeps each bucket sorted by id.
        for id in combatants.alive_ids() {
            let i = id.index();
            let p = planar(combatants.position[i]);
            let cell = self.cell_index(p);
            let slot = self.cursor[cell] as usize;
            self.cursor[cell] += 1;
            self.ids[slot] = id;
            self.points[slot] = p;
            self.teams[slot] = combatants.team[i];
        }
    }

    /// Ids bucketed in one cell.
    pub fn cell_contents(&self, cx: usize, cz: usize) -> &[EntityId] {
        if cx >= self.cols || cz >= self.rows {
            return &[];
        }
        let cell = cz * self.cols + cx;
        &self.ids[self.cell_start[cell] as usize..self.cell_start[cell + 1] as usize]
    }

    /// Visit every combatant within `radius` of `center` as
    /// `(id, planar position, team, distance squared)`.
    pub fn for_each_in_radius<F>(&self, center: Vec2, radius: f32, mut visit: F)
    where
        F: FnMut(EntityId, Vec2, Team, f32),
    {
        if self.ids.is_empty() || radius < 0.0 {
            return;
        }
        let r_sq = radius * radius;
        let (x0, z0) = self.clamp_cell(self.world_to_cell(center - Vec2::splat(radius)));
        let (x1, z1) = self.clamp_cell(self.world_to_cell(center + Vec2::splat(radius)));
        for cz in z0..=z1 {
            for cx in x0..=x1 {
                let cell = cz * self.cols + cx;
                let start = self.cell_start[cell] as usize;
                let end = self.cell_start[cell + 1] as usize;
                for slot in start..end {
                    let d_sq = self.points[slot].distance_squared(center);
                    if d_sq <= r_sq {
                        visit(self.ids[slot], self.points[slot], self.teams[slot], d_sq);
                    }
                }
            }
        }
    }

    /// Append all combatants within `radius` to `out`.
    pub fn query_radius_into(&self, center: Vec2, radius: f32, out: &mut Vec<EntityId>) {
        self.for_each_in_radius(center, radius, |id, _, _, _| out.push(id));
    }

    pub fn query_radius(&self, center: Vec2, radius: f32) -> Vec<EntityId> {
        let mut out = Vec::new();
        self.query_radius_into(center, radius, &mut out);
        out
    }

    /// Append combatants of one team within `radius` to `out`.
    pub fn query_team_into(&self, center: Vec2, radius: f32, team: Team, out: &mut Vec<EntityId>) {
        self.for_each_in_radius(center, radius, |id, _, t, _| {
            if t == team {
                out.push(id);
            }
        });
    }

    /// Closest combatant accepted by `filter`. Equal distances resolve to
    /// the lower id.
    pub fn nearest<F>(&self, center: Vec2, radius: f32, mut filter: F) -> Option<EntityId>
    where
        F: FnMut(EntityId, Team) -> bool,
    {
        let mut best: Option<(f32, EntityId)> = None;
        self.for_each_in_radius(center, radius, |id, _, team, d_sq| {
            if !filter(id, team) {
                return;
            }
            let better = match best {
                None => true,
                Some((bd, bid)) => d_sq < bd || (d_sq == bd && id < bid),
            };
            if better {
                best = Some((d_sq, id));
            }
        });
        best.map(|(_, id)| id)
    }

    pub fn nearest_of_team(&self, center: Vec2, radius: f32, team: Team) -> Option<EntityId> {
        self.nearest(center, radius, |_, t| t == team)
    }
}

/// Rebuilds the grid from the entity store.
pub fn spatial_grid_update_system(
    mut grid: ResMut<SpatialGrid>,
    combatants: Res<Combatants>,
    config: Res<SimConfig>,
) {
    if !grid.matches(&config) {
        debug!(
            cell_size = config.spatial_cell_size,
            half_width = config.world_half_width,
            half_height = config.world_half_height,
            "spatial grid layout changed"
        );
        *grid = SpatialGrid::new(
            config.world_half_width,
            config.world_half_height,
            config.spatial_cell_size,
            combatants.capacity(),
        );
    }
    grid.rebuild(&combatants);
}
