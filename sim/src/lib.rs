//! Tactical Combat Core
//!
//! A deterministic, fixed-timestep simulation of individual combatants in
//! squad-level firefights. Uses `bevy_ecs` resources and schedules for the
//! per-tick pipeline: spatial index, perception, decisions, movement and
//! combat resolution.
//!
//! ```no_run
//! use tac_sim::{Role, SimWorld, SpawnParams, Team};
//! use glam::Vec3;
//!
//! let mut sim = SimWorld::new(64, 7);
//! let id = sim
//!     .spawn(SpawnParams::new(Team::Blue, Role::Rifleman, 0, Vec3::ZERO))
//!     .unwrap();
//! sim.step(1.0 / 60.0);
//! println!("{:?}", sim.position(id));
//! ```

pub mod api;
pub mod components;
pub mod config;
pub mod entity;
pub mod error;
pub mod links;
pub mod math;
pub mod profiler;
pub mod spatial;
pub mod squads;
pub mod stigmergy;
pub mod systems;
pub mod terrain;
pub mod world;

pub use api::SimWorld;
pub use components::*;
pub use config::SimConfig;
pub use entity::{CombatantRecord, Combatants, EntityId, SpawnParams};
pub use error::{Result, SimError};
pub use links::WorldLinks;
pub use profiler::{Profiler, Stage};
pub use spatial::SpatialGrid;
pub use squads::{SquadInfo, SquadTable};
pub use stigmergy::{Channel, FlowField, GridField, PointFlow, Stigmergy};
pub use systems::*;
pub use terrain::{CoverQuery, Material, RayHit, Terrain, VoxelTerrain};
pub use world::Snapshot;
