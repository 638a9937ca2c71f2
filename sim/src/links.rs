//! Injected external collaborators.
//!
//! Every collaborator is optional. Queries against a missing one return a
//! conservative default: clear line of sight, zero cover, zero signal.

use crate::stigmergy::{Channel, FlowField, Stigmergy};
use crate::terrain::{CoverQuery, RayHits, Terrain};
use bevy_ecs::prelude::*;
use glam::{IVec3, Vec2, Vec3};
use std::fmt;
use std::sync::Arc;

#[derive(Resource, Default, Clone)]
pub struct WorldLinks {
    pub terrain: Option<Arc<dyn Terrain>>,
    pub cover: Option<Arc<dyn CoverQuery>>,
    pub stigmergy: Option<Arc<dyn Stigmergy>>,
    pub flow: Option<Arc<dyn FlowField>>,
}

impl fmt::Debug for WorldLinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldLinks")
            .field("terrain", &self.terrain.is_some())
            .field("cover", &self.cover.is_some())
            .field("stigmergy", &self.stigmergy.is_some())
            .field("flow", &self.flow.is_some())
            .finish()
    }
}

impl WorldLinks {
    #[inline]
    pub fn check_los(&self, from: Vec3, to: Vec3) -> bool {
        self.terrain
            .as_ref()
            .map_or(true, |t| t.check_los(from, to))
    }

    #[inline]
    pub fn is_solid(&self, voxel: IVec3) -> bool {
        self.terrain.as_ref().is_some_and(|t| t.is_solid(voxel))
    }

    /// Ground height, or `fallback` without terrain.
    #[inline]
    pub fn ground_height(&self, x: f32, z: f32, fallback: f32) -> f32 {
        self.terrain
            .as_ref()
            .map_or(fallback, |t| t.ground_height(x, z))
    }

    pub fn raycast_multi(&self, origin: Vec3, dir: Vec3, max_dist: f32) -> RayHits {
        self.terrain
            .as_ref()
            .map(|t| t.raycast_multi(origin, dir, max_dist))
            .unwrap_or_default()
    }

    pub fn voxel_size(&self) -> f32 {
        self.terrain.as_ref().map_or(1.0, |t| t.voxel_size())
    }

    pub fn voxel_at(&self, p: Vec3) -> IVec3 {
        match &self.terrain {
            Some(t) => t.voxel_at(p),
            None => p.floor().as_ivec3(),
        }
    }

    #[inline]
    pub fn cover_value(&self, pos: Vec3, threat_dir: Vec2) -> f32 {
        self.cover
            .as_ref()
            .map_or(0.0, |c| c.cover_value(pos, threat_dir).clamp(0.0, 1.0))
    }

    #[inline]
    pub fn sample(&self, pos: Vec3, channel: Channel) -> f32 {
        self.stigmergy
            .as_ref()
            .map_or(0.0, |s| s.sample(pos, channel))
    }

    #[inline]
    pub fn gradient(&self, pos: Vec3, channel: Channel) -> Vec2 {
        self.stigmergy
            .as_ref()
            .map_or(Vec2::ZERO, |s| s.gradient(pos, channel))
    }

    pub fn deposit(&self, pos: Vec3, channel: Channel, amount: f32) {
        if let Some(s) = &self.stigmergy {
            s.deposit(pos, channel, amount);
        }
    }

    pub fn deposit_radius(&self, pos: Vec3, channel: Channel, amount: f32, radius: f32) {
        if let Some(s) = &self.stigmergy {
            s.deposit_radius(pos, channel, amount, radius);
        }
    }

    pub fn deposit_cone(
        &self,
        origin: Vec3,
        dir: Vec2,
        half_angle: f32,
        range: f32,
        channel: Channel,
        amount: f32,
    ) {
        if let Some(s) = &self.stigmergy {
            s.deposit_cone(origin, dir, half_angle, range, channel, amount);
        }
    }

    pub fn deposit_trail(&self, from: Vec3, to: Vec3, channel: Channel, amount: f32) {
        if let Some(s) = &self.stigmergy {
            s.deposit_trail(from, to, channel, amount);
        }
    }

    #[inline]
    pub fn flow_direction(&self, pos: Vec3) -> Option<Vec2> {
        self.flow.as_ref().and_then(|f| f.direction(pos))
    }
}
