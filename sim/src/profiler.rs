//! Wall-clock timing per pipeline stage.
//!
//! `SimWorld` wraps every stage run in [`Profiler::time`]. The figures are
//! observability only; nothing in the simulation reads them.
//!
//! The demo prints the summary when built with the `profile` feature:
//! ```bash
//! cargo run --release --example skirmish_demo --features profile
//! ```

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Spatial,
    Perception,
    Decision,
    Movement,
    Combat,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Spatial,
        Stage::Perception,
        Stage::Decision,
        Stage::Movement,
        Stage::Combat,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Spatial => "spatial",
            Stage::Perception => "perception",
            Stage::Decision => "decision",
            Stage::Movement => "movement",
            Stage::Combat => "combat",
        }
    }
}

/// Timing statistics for one stage.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct StageStats {
    pub total: Duration,
    pub calls: u64,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
    /// Duration of the most recent run.
    pub last: Duration,
}

impl StageStats {
    pub fn average(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total.div_f64(self.calls as f64)
        }
    }

    fn record(&mut self, elapsed: Duration) {
        self.total += elapsed;
        self.calls += 1;
        self.last = elapsed;
        self.min = Some(self.min.map_or(elapsed, |m| m.min(elapsed)));
        self.max = Some(self.max.map_or(elapsed, |m| m.max(elapsed)));
    }
}

#[derive(Debug, Default, Clone)]
pub struct Profiler {
    stages: [StageStats; 5],
    ticks: u64,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` and charge its wall-clock time to `stage`.
    pub fn time<F, R>(&mut self, stage: Stage, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.stages[stage.index()].record(start.elapsed());
        result
    }

    pub fn end_tick(&mut self) {
        self.ticks += 1;
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn stage(&self, stage: Stage) -> &StageStats {
        &self.stages[stage.index()]
    }

    /// Sum of the most recent run of every stage.
    pub fn last_tick(&self) -> Duration {
        self.stages.iter().map(|s| s.last).sum()
    }

    pub fn total(&self) -> Duration {
        self.stages.iter().map(|s| s.total).sum()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for Profiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Stage timings ({} ticks) ===", self.ticks)?;
        writeln!(
            f,
            "{:<12} {:>10} {:>10} {:>10} {:>10} {:>7}",
            "Stage", "Total", "Avg", "Min", "Max", "% Time"
        )?;
        writeln!(f, "{}", "-".repeat(64))?;
        let total = self.total();
        for stage in Stage::ALL {
            let s = self.stage(stage);
            let pct = if total.as_nanos() > 0 {
                s.total.as_nanos() as f64 / total.as_nanos() as f64 * 100.0
            } else {
                0.0
            };
            writeln!(
                f,
                "{:<12} {:>10.2?} {:>10.2?} {:>10.2?} {:>10.2?} {:>6.1}%",
                stage.name(),
                s.total,
                s.average(),
                s.min.unwrap_or_default(),
                s.max.unwrap_or_default(),
                pct
            )?;
        }
        writeln!(f, "{}", "-".repeat(64))?;
        if self.ticks > 0 {
            let per_tick = total.div_f64(self.ticks as f64);
            let fps = if per_tick.as_secs_f64() > 0.0 {
                1.0 / per_tick.as_secs_f64()
            } else {
                0.0
            };
            writeln!(f, "{:<12} {:>10.2?} ({:.1} ticks/s)", "per tick", per_tick, fps)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_stage_timing_accumulates() {
        let mut profiler = Profiler::new();
        for _ in 0..3 {
            profiler.time(Stage::Combat, || sleep(Duration::from_millis(2)));
            profiler.time(Stage::Spatial, || ());
            profiler.end_tick();
        }
        assert_eq!(profiler.ticks(), 3);
        let combat = profiler.stage(Stage::Combat);
        assert_eq!(combat.calls, 3);
        assert!(combat.total >= Duration::from_millis(6));
        assert!(combat.min.unwrap() <= combat.max.unwrap());
        assert_eq!(profiler.stage(Stage::Decision).calls, 0);
        assert!(profiler.to_string().contains("combat"));
    }

    #[test]
    fn test_time_returns_closure_value() {
        let mut profiler = Profiler::new();
        assert_eq!(profiler.time(Stage::Decision, || 7), 7);
        profiler.reset();
        assert_eq!(profiler.stage(Stage::Decision).calls, 0);
    }
}
