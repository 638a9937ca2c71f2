//! Observability counters.
//!
//! Counters are written by the stages that produce the events and read by
//! the snapshot and the profiler summary. Nothing in the pipeline branches
//! on them.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use tracing::debug;

use super::time::SimTick;

/// Per-tick event counts. Reset at the start of every tick.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickCounters {
    pub los_checks: u32,
    pub suppressive_targets: u32,
    /// Projectiles stopped inside geometry.
    pub wall_blocks: u32,
    pub shots_fired: u32,
    pub hits: u32,
    pub near_misses: u32,
    pub deflections: u32,
    pub explosions: u32,
    pub decisions: u32,
    pub deaths: u32,
}

impl AddAssign for TickCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.los_checks += rhs.los_checks;
        self.suppressive_targets += rhs.suppressive_targets;
        self.wall_blocks += rhs.wall_blocks;
        self.shots_fired += rhs.shots_fired;
        self.hits += rhs.hits;
        self.near_misses += rhs.near_misses;
        self.deflections += rhs.deflections;
        self.explosions += rhs.explosions;
        self.decisions += rhs.decisions;
        self.deaths += rhs.deaths;
    }
}

/// Running totals since the simulation started.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterTotals(pub TickCounters);

pub fn reset_counters_system(mut counters: ResMut<TickCounters>) {
    *counters = TickCounters::default();
}

/// Fold this tick's counters into the totals and advance the tick number.
pub fn finish_tick_system(
    counters: Res<TickCounters>,
    mut totals: ResMut<CounterTotals>,
    mut tick: ResMut<SimTick>,
) {
    totals.0 += *counters;
    debug!(
        tick = tick.0,
        los = counters.los_checks,
        suppressive = counters.suppressive_targets,
        shots = counters.shots_fired,
        hits = counters.hits,
        wall_blocks = counters.wall_blocks,
        deaths = counters.deaths,
        "tick complete"
    );
    tick.increment();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_accumulate_across_ticks() {
        let mut world = World::new();
        world.insert_resource(TickCounters::default());
        world.insert_resource(CounterTotals::default());
        world.insert_resource(SimTick(0));

        let mut schedule = Schedule::default();
        schedule.add_systems(finish_tick_system);

        for _ in 0..3 {
            world.resource_mut::<TickCounters>().los_checks = 5;
            schedule.run(&mut world);
        }
        assert_eq!(world.resource::<CounterTotals>().0.los_checks, 15);
        assert_eq!(world.resource::<SimTick>().0, 3);

        let mut reset = Schedule::default();
        reset.add_systems(reset_counters_system);
        reset.run(&mut world);
        assert_eq!(*world.resource::<TickCounters>(), TickCounters::default());
    }
}
