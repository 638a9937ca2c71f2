//! Clock resources shared by every stage.

use bevy_ecs::prelude::*;

/// Delta time for the current tick in seconds.
#[derive(Resource, Debug, Clone, Copy)]
pub struct DeltaTime(pub f32);

impl Default for DeltaTime {
    fn default() -> Self {
        Self(1.0 / 30.0)
    }
}

/// Number of completed ticks.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimTick(pub u64);

impl SimTick {
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

/// Elapsed simulation time in seconds.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq)]
pub struct SimTime(pub f64);

/// World RNG seed. Every random draw derives from it.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimSeed(pub u64);

/// Random stream ids, one per kind of draw.
pub mod streams {
    pub const SPREAD: u64 = 1;
    pub const DEFLECT: u64 = 2;
    pub const FRIENDLY_FIRE: u64 = 3;
    pub const SCATTER: u64 = 4;
    pub const PENETRATION: u64 = 5;
}
