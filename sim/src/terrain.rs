//! Terrain collaborator contract and a column-voxel implementation.
//!
//! The simulation only ever talks to terrain through the [`Terrain`] and
//! [`CoverQuery`] traits. [`VoxelTerrain`] is a deterministic heightmap of
//! voxel columns used by tests and the demo; a host engine supplies its own
//! implementation.

use crate::math::planar;
use glam::{IVec3, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Upper bound on hits reported by a single raycast.
pub const MAX_RAY_HITS: usize = 8;

/// Hits collected by [`Terrain::raycast_multi`].
pub type RayHits = SmallVec<[RayHit; MAX_RAY_HITS]>;

/// Surface material of a solid voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Material {
    #[default]
    Soil,
    Wood,
    Brick,
    Concrete,
    Metal,
}

impl Material {
    /// Penetration energy a projectile spends passing through one voxel.
    pub fn resistance(self) -> f32 {
        match self {
            Material::Soil => 140.0,
            Material::Wood => 35.0,
            Material::Brick => 90.0,
            Material::Concrete => 160.0,
            Material::Metal => 220.0,
        }
    }
}

/// One surface crossing along a ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub position: Vec3,
    pub normal: Vec3,
    pub material: Material,
    /// Distance from the ray origin.
    pub distance: f32,
}

/// Voxel world queries consumed by the simulation.
pub trait Terrain: Send + Sync {
    fn is_solid(&self, voxel: IVec3) -> bool;

    /// True when nothing solid lies between the two points.
    fn check_los(&self, from: Vec3, to: Vec3) -> bool;

    /// Height of the walkable surface at a planar position.
    fn ground_height(&self, x: f32, z: f32) -> f32;

    /// Entry points into solid geometry along a ray, nearest first.
    fn raycast_multi(&self, origin: Vec3, dir: Vec3, max_dist: f32) -> RayHits;

    /// Edge length of one voxel.
    fn voxel_size(&self) -> f32 {
        1.0
    }

    fn voxel_at(&self, p: Vec3) -> IVec3 {
        (p / self.voxel_size()).floor().as_ivec3()
    }
}

/// Directional cover lookup.
pub trait CoverQuery: Send + Sync {
    /// Protection at `position` against fire arriving from `threat_dir`
    /// (pointing from the position toward the threat), in 0..1.
    fn cover_value(&self, position: Vec3, threat_dir: Vec2) -> f32;
}

/// A single voxel column.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Column {
    /// Number of solid voxels stacked from y = 0.
    pub height: u16,
    pub material: Material,
}

/// Grid of voxel columns centered on the origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoxelTerrain {
    /// Columns along X.
    pub width: usize,
    /// Columns along Z.
    pub depth: usize,
    pub voxel_size: f32,
    pub origin_x: f32,
    pub origin_z: f32,
    /// Row-major columns (z * width + x).
    pub columns: Vec<Column>,
}

impl VoxelTerrain {
    /// Flat ground of `base` voxels everywhere.
    pub fn flat(width: usize, depth: usize, voxel_size: f32, base: u16) -> Self {
        Self {
            width,
            depth,
            voxel_size,
            origin_x: -(width as f32 * voxel_size) / 2.0,
            origin_z: -(depth as f32 * voxel_size) / 2.0,
            columns: vec![
                Column {
                    height: base,
                    material: Material::Soil,
                };
                width * depth
            ],
        }
    }

    fn column_index(&self, cx: i32, cz: i32) -> Option<usize> {
        if cx >= 0 && cz >= 0 && (cx as usize) < self.width && (cz as usize) < self.depth {
            Some(cz as usize * self.width + cx as usize)
        } else {
            None
        }
    }

    /// Column coordinates of a world position (unclamped).
    pub fn world_to_column(&self, x: f32, z: f32) -> (i32, i32) {
        (
            ((x - self.origin_x) / self.voxel_size).floor() as i32,
            ((z - self.origin_z) / self.voxel_size).floor() as i32,
        )
    }

    pub fn column_at(&self, x: f32, z: f32) -> Option<Column> {
        let (cx, cz) = self.world_to_column(x, z);
        self.column_index(cx, cz).map(|i| self.columns[i])
    }

    /// Set the column containing a world position.
    pub fn set_column(&mut self, x: f32, z: f32, height: u16, material: Material) {
        let (cx, cz) = self.world_to_column(x, z);
        if let Some(i) = self.column_index(cx, cz) {
            self.columns[i] = Column { height, material };
        }
    }

    /// Raise every column inside an axis-aligned planar rectangle.
    pub fn add_block(&mut self, min: Vec2, max: Vec2, height: u16, material: Material) {
        let (x0, z0) = self.world_to_column(min.x, min.y);
        let (x1, z1) = self.world_to_column(max.x, max.y);
        for cz in z0.min(z1)..=z0.max(z1) {
            for cx in x0.min(x1)..=x0.max(x1) {
                if let Some(i) = self.column_index(cx, cz) {
                    let col = &mut self.columns[i];
                    col.height = col.height.max(height);
                    col.material = material;
                }
            }
        }
    }

    /// Thin wall between two planar points.
    pub fn add_wall(&mut self, from: Vec2, to: Vec2, height: u16, material: Material) {
        let len = from.distance(to);
        let steps = (len / (self.voxel_size * 0.5)).ceil().max(1.0) as usize;
        for s in 0..=steps {
            let p = from.lerp(to, s as f32 / steps as f32);
            let (cx, cz) = self.world_to_column(p.x, p.y);
            if let Some(i) = self.column_index(cx, cz) {
                let col = &mut self.columns[i];
                col.height = col.height.max(height);
                col.material = material;
            }
        }
    }

    fn material_of(&self, voxel: IVec3) -> Material {
        self.column_index(voxel.x, voxel.z)
            .map(|i| self.columns[i].material)
            .unwrap_or_default()
    }

    fn world_voxel(&self, p: Vec3) -> IVec3 {
        IVec3::new(
            ((p.x - self.origin_x) / self.voxel_size).floor() as i32,
            (p.y / self.voxel_size).floor() as i32,
            ((p.z - self.origin_z) / self.voxel_size).floor() as i32,
        )
    }
}

impl Terrain for VoxelTerrain {
    fn is_solid(&self, voxel: IVec3) -> bool {
        if voxel.y < 0 {
            return true;
        }
        self.column_index(voxel.x, voxel.z)
            .map(|i| voxel.y < self.columns[i].height as i32)
            .unwrap_or(false)
    }

    fn check_los(&self, from: Vec3, to: Vec3) -> bool {
        let delta = to - from;
        let len = delta.length();
        let steps = (len / (self.voxel_size * 0.5)).ceil() as usize;
        // Skip the first and last sample so a shooter hugging a wall can
        // still see over it from its own voxel.
        for s in 1..steps {
            let p = from + delta * (s as f32 / steps as f32);
            if self.is_solid(self.world_voxel(p)) {
                return false;
            }
        }
        true
    }

    fn ground_height(&self, x: f32, z: f32) -> f32 {
        self.column_at(x, z)
            .map(|c| c.height as f32 * self.voxel_size)
            .unwrap_or(0.0)
    }

    fn raycast_multi(&self, origin: Vec3, dir: Vec3, max_dist: f32) -> RayHits {
        let mut hits = RayHits::new();
        let dir = dir.normalize_or_zero();
        if dir == Vec3::ZERO || max_dist <= 0.0 {
            return hits;
        }
        let step = self.voxel_size * 0.25;
        let mut inside = self.is_solid(self.world_voxel(origin));
        let mut prev_voxel = self.world_voxel(origin);
        let mut t = step;
        while t <= max_dist && hits.len() < MAX_RAY_HITS {
            let p = origin + dir * t;
            let voxel = self.world_voxel(p);
            let solid = self.is_solid(voxel);
            if solid && !inside {
                let diff = voxel - prev_voxel;
                let normal = if diff.y != 0 {
                    Vec3::new(0.0, -diff.y.signum() as f32, 0.0)
                } else if diff.x != 0 {
                    Vec3::new(-diff.x.signum() as f32, 0.0, 0.0)
                } else {
                    Vec3::new(0.0, 0.0, -diff.z.signum() as f32)
                };
                hits.push(RayHit {
                    position: p,
                    normal,
                    material: self.material_of(voxel),
                    distance: t,
                });
            }
            inside = solid;
            prev_voxel = voxel;
            t += step;
        }
        hits
    }

    fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    fn voxel_at(&self, p: Vec3) -> IVec3 {
        self.world_voxel(p)
    }
}

impl CoverQuery for VoxelTerrain {
    fn cover_value(&self, position: Vec3, threat_dir: Vec2) -> f32 {
        let dir = threat_dir.normalize_or_zero();
        if dir == Vec2::ZERO {
            return 0.0;
        }
        let here = planar(position);
        let mut best: f32 = 0.0;
        for reach in [0.75, 1.5] {
            let probe = here + dir * reach * self.voxel_size.max(1.0);
            let top = self.ground_height(probe.x, probe.y);
            let rise = top - position.y;
            let value = if rise >= 1.4 {
                1.0
            } else if rise >= 0.8 {
                0.6
            } else if rise >= 0.4 {
                0.3
            } else {
                0.0
            };
            best = best.max(value);
        }
        best
    }
}
