//! Simulation stages.
//!
//! Systems are plain functions over resources. `SimWorld` runs them as
//! five chained stages, each its own schedule:
//!
//! **Spatial** - rebuild the grid, refresh the squad table:
//! - `spatial_grid_update_system`
//! - `squad_refresh_system`
//!
//! **Perception** - one observer batch per tick:
//! - `perception_system`
//!
//! **Decision** - staggered re-evaluation of due combatants:
//! - `decision_system`
//!
//! **Movement** - posture, then steering, avoidance and locomotion:
//! - `posture_system`
//! - `steering_system`
//! - `orca_system`
//! - `movement_system`
//!
//! **Combat** - fire, fly, detonate, then the slow dynamics:
//! - `combat_system`
//! - `projectile_system`
//! - `explosion_system`
//! - `hazard_system`
//! - `suppression_decay_system`
//! - `morale_system`
//! - `finish_tick_system`
//!
//! ## Parallelism
//!
//! The expensive stages split into a read-only gather over entity ids and
//! a sequential apply in id order. With `--features parallel` the gather
//! runs on rayon; results are identical either way.

pub mod combat;
pub mod decision;
pub mod diagnostics;
pub mod explosion;
pub mod hazards;
pub mod morale;
pub mod movement;
pub mod orca;
pub mod perception;
pub mod projectile;
pub mod steering;
pub mod suppression;
pub mod tactical;
pub mod targeting;
pub mod time;

pub use combat::combat_system;
pub use decision::decision_system;
pub use diagnostics::{finish_tick_system, reset_counters_system, CounterTotals, TickCounters};
pub use explosion::explosion_system;
pub use hazards::{hazard_system, HazardKind, Hazards};
pub use morale::morale_system;
pub use movement::movement_system;
pub use orca::orca_system;
pub use perception::{perception_system, FogOfWar};
pub use projectile::{projectile_system, Projectiles};
pub use steering::{steering_system, DesiredVelocities};
pub use suppression::{posture_system, suppression_decay_system};
pub use time::{DeltaTime, SimSeed, SimTick, SimTime};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Map `f` over `items`, preserving order.
///
/// `f` must only read shared state. Under the `parallel` feature the work
/// is spread across the rayon pool.
pub fn gather<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        items.par_iter().map(f).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        items.iter().map(f).collect()
    }
}
