//! Runtime tuning table.
//!
//! Every tunable is an `f32` with a default value and a snake-case key.
//! The table is an ECS resource read by the systems each tick, so writes
//! through [`SimConfig::set`] take effect on the next tick.

use crate::components::{MovementMode, Posture};
use crate::error::{Result, SimError};
use bevy_ecs::prelude::*;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

macro_rules! tunables {
    ($( $(#[$meta:meta])* $field:ident = $default:expr; )*) => {
        /// Hot-reloadable numeric configuration.
        #[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct SimConfig {
            $( $(#[$meta])* pub $field: f32, )*
        }

        impl Default for SimConfig {
            fn default() -> Self {
                Self { $( $field: $default, )* }
            }
        }

        impl SimConfig {
            /// All keys accepted by [`SimConfig::get`] and [`SimConfig::set`].
            pub const KEYS: &'static [&'static str] = &[$( stringify!($field), )*];

            /// Read a value by key.
            pub fn get(&self, key: &str) -> Option<f32> {
                match key {
                    $( stringify!($field) => Some(self.$field), )*
                    _ => None,
                }
            }

            fn slot_mut(&mut self, key: &str) -> Option<&mut f32> {
                match key {
                    $( stringify!($field) => Some(&mut self.$field), )*
                    _ => None,
                }
            }
        }
    };
}

tunables! {
    /// Fixed timestep in seconds used by `SimWorld::step`.
    fixed_timestep = 1.0 / 30.0;

    /// Half extent of the playable area along X.
    world_half_width = 256.0;
    /// Half extent of the playable area along Z.
    world_half_height = 256.0;
    /// Edge length of a spatial index cell.
    spatial_cell_size = 8.0;

    // Perception
    /// Visual detection radius.
    detection_radius = 60.0;
    /// Radius at which noisy enemies are heard.
    acoustic_radius = 90.0;
    /// Minimum observers processed per tick.
    perception_batch_size = 64.0;
    /// Seconds between full visibility refreshes.
    perception_refresh_interval = 2.0;
    /// How long a last-known position stays usable for suppressive fire.
    seen_decay = 6.0;

    // Decision engine
    decision_interval = 0.5;
    /// Fraction the decision interval shrinks at full contact.
    decision_contact_speedup = 0.6;
    engage_threshold = 0.25;
    attack_move_engage_threshold = 0.15;
    cover_seek_suppression = 0.5;
    cover_seek_health = 0.5;
    cover_good_enough = 0.6;
    cover_search_radius = 10.0;
    poor_aim_quality = 0.3;
    flank_distance = 18.0;
    flank_min_distance = 6.0;
    flank_ambient_suppression = 0.5;
    target_stickiness = 0.15;
    suppress_allies_on_target = 3.0;

    // Morale and suppression
    suppression_decay = 0.15;
    morale_recovery = 0.02;
    morale_suppressed_penalty = 0.05;
    morale_pinned_penalty = 0.1;
    morale_wound_penalty = 0.03;
    morale_cohesion_bonus = 0.01;
    morale_kill_bonus = 0.05;
    morale_ally_death_shock = 0.08;
    morale_hit_shock = 0.04;
    /// How far ambient fear/courage can move a break threshold.
    fear_threshold_shift = 0.15;
    /// Minimum time a catatonic combatant stays frozen.
    frozen_duration = 4.0;
    downed_health = 0.15;
    posture_transition_time = 0.6;

    // Local avoidance
    orca_agent_radius = 0.4;
    orca_time_horizon = 2.0;
    orca_obstacle_horizon = 1.0;
    orca_neighbor_dist = 6.0;
    orca_max_neighbors = 10.0;
    orca_wall_probe = 2.5;
    /// Solved speed below this fraction of the desired speed counts as a stall.
    orca_stall_ratio = 0.2;
    /// Fraction of the original intent blended back on a stall.
    orca_stall_blend = 0.25;

    // Context steering
    steer_goal_weight = 1.0;
    steer_flow_weight = 0.6;
    steer_stigmergy_weight = 0.5;
    steer_strategic_weight = 0.4;
    steer_danger_weight = 1.0;
    steer_border_margin = 6.0;
    steer_lookahead = 2.0;
    steer_arrive_radius = 1.0;

    // Locomotion
    accel_stand = 6.0;
    accel_crouch = 4.0;
    accel_prone = 2.5;
    decel_stand = 10.0;
    decel_crouch = 8.0;
    decel_prone = 6.0;
    turn_rate = 6.0;
    dead_band = 0.05;
    vault_height = 0.6;
    climb_height = 2.2;
    climb_speed = 1.2;
    climb_cooldown = 1.0;
    gravity = 9.81;
    fall_damage_speed = 9.0;

    // Speed table, posture x movement mode
    speed_stand_sneak = 1.4;
    speed_stand_walk = 2.2;
    speed_stand_run = 4.5;
    speed_stand_charge = 5.5;
    speed_crouch_sneak = 0.9;
    speed_crouch_walk = 1.5;
    speed_crouch_run = 2.5;
    speed_crouch_charge = 3.0;
    speed_prone_sneak = 0.35;
    speed_prone_walk = 0.5;
    speed_prone_run = 0.7;
    speed_prone_charge = 0.8;

    // Combat
    /// Speed above which non-charging units hold fire.
    move_fire_speed = 1.0;
    near_miss_radius = 1.5;
    near_miss_suppression = 0.08;
    cover_deflect_factor = 0.6;
    suppressive_scatter = 2.5;
    explosion_lethal_radius = 4.0;
    explosion_suppression_radius = 8.0;
    explosion_damage = 1.5;
    explosion_suppression = 0.6;
    explosion_friendly_fire = 0.2;
    smoke_radius = 6.0;
    smoke_duration = 20.0;
    gas_radius = 5.0;
    gas_duration = 12.0;
    gas_damage_per_second = 0.04;

    // Formation leash distances
    formation_leash = 12.0;
    formation_max_leash = 30.0;
}

impl SimConfig {
    /// Write a value by key. Takes effect on the next tick.
    pub fn set(&mut self, key: &str, value: f32) -> Result<()> {
        if !value.is_finite() {
            return Err(SimError::InvalidConfigValue {
                key: key.to_string(),
                value,
            });
        }
        match self.slot_mut(key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(SimError::UnknownConfigKey(key.to_string())),
        }
    }

    /// Apply many values at once. Stops at the first rejected entry;
    /// entries applied before it are kept.
    pub fn apply_map(&mut self, values: &HashMap<String, f32>) -> Result<()> {
        let mut keys: Vec<&String> = values.keys().collect();
        keys.sort();
        for key in keys {
            self.set(key, values[key])?;
        }
        Ok(())
    }

    /// Export the whole table as a key->value map.
    pub fn to_map(&self) -> HashMap<String, f32> {
        Self::KEYS
            .iter()
            .filter_map(|k| self.get(k).map(|v| (k.to_string(), v)))
            .collect()
    }

    /// Base movement speed for a posture and movement mode.
    pub fn speed(&self, posture: Posture, mode: MovementMode) -> f32 {
        match (posture, mode) {
            (Posture::Stand, MovementMode::Sneak) => self.speed_stand_sneak,
            (Posture::Stand, MovementMode::Walk) => self.speed_stand_walk,
            (Posture::Stand, MovementMode::Run) => self.speed_stand_run,
            (Posture::Stand, MovementMode::Charge) => self.speed_stand_charge,
            (Posture::Crouch, MovementMode::Sneak) => self.speed_crouch_sneak,
            (Posture::Crouch, MovementMode::Walk) => self.speed_crouch_walk,
            (Posture::Crouch, MovementMode::Run) => self.speed_crouch_run,
            (Posture::Crouch, MovementMode::Charge) => self.speed_crouch_charge,
            (Posture::Prone, MovementMode::Sneak) => self.speed_prone_sneak,
            (Posture::Prone, MovementMode::Walk) => self.speed_prone_walk,
            (Posture::Prone, MovementMode::Run) => self.speed_prone_run,
            (Posture::Prone, MovementMode::Charge) => self.speed_prone_charge,
        }
    }

    /// Exponential acceleration and deceleration rates for a posture.
    pub fn accel_rates(&self, posture: Posture) -> (f32, f32) {
        match posture {
            Posture::Stand => (self.accel_stand, self.decel_stand),
            Posture::Crouch => (self.accel_crouch, self.decel_crouch),
            Posture::Prone => (self.accel_prone, self.decel_prone),
        }
    }
}
