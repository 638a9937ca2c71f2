//! Entity store: one structure-of-arrays record per combatant.
//!
//! Slots are handed out in spawn order and never reused while the
//! simulation lives, so an `EntityId` stays valid for the whole run.
//! A dead combatant keeps its slot with its final values frozen.
//!
//! All backing arrays are allocated up front for the configured capacity.

use crate::components::*;
use crate::error::{Result, SimError};
use bevy_ecs::prelude::*;
use bitvec::prelude::*;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Stable index of a combatant slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    /// Never refers to a slot.
    pub const INVALID: EntityId = EntityId(u32::MAX);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Convert an externally supplied id. Negative or oversized values map
    /// to [`EntityId::INVALID`].
    pub fn from_raw(raw: i64) -> Self {
        u32::try_from(raw)
            .ok()
            .filter(|v| *v != u32::MAX)
            .map(EntityId)
            .unwrap_or(Self::INVALID)
    }
}

/// Parameters for a new combatant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnParams {
    pub team: Team,
    pub role: Role,
    pub squad: u32,
    pub personality: Personality,
    pub position: Vec3,
    /// Heading in radians around +Y, measured in the XZ plane from +X.
    pub facing: f32,
    pub posture: Posture,
}

impl SpawnParams {
    pub fn new(team: Team, role: Role, squad: u32, position: Vec3) -> Self {
        Self {
            team,
            role,
            squad,
            personality: Personality::Steady,
            position,
            facing: 0.0,
            posture: Posture::Stand,
        }
    }

    pub fn with_personality(mut self, personality: Personality) -> Self {
        self.personality = personality;
        self
    }

    pub fn facing(mut self, facing: f32) -> Self {
        self.facing = facing;
        self
    }
}

/// Full copy of one combatant slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatantRecord {
    pub alive: bool,
    pub team: Team,
    pub role: Role,
    pub squad: u32,
    pub squad_slot: u16,
    pub personality: Personality,
    pub position: Vec3,
    pub velocity: Vec3,
    pub actual_velocity: Vec3,
    pub facing: f32,
    pub health: f32,
    pub morale: f32,
    pub suppression: f32,
    pub posture: Posture,
    pub posture_target: Posture,
    pub posture_timer: f32,
    pub target: Option<EntityId>,
    pub suppressive: bool,
    pub aim_point: Vec3,
    pub ammo: u16,
    pub payload: PayloadKind,
    pub cooldown: f32,
    pub reload_timer: f32,
    pub deploy_timer: f32,
    pub settle_timer: f32,
    pub state: CombatState,
    pub resume_state: CombatState,
    pub mode: MovementMode,
    pub decision_timer: f32,
    pub order: Order,
    pub goal: Option<Vec3>,
    pub broken: bool,
    pub frozen_timer: f32,
    pub climb_timer: f32,
    pub climb_cooldown: f32,
    pub climb_target: f32,
    pub cover: f32,
    pub threat_dir: Vec2,
    pub aim_quality: f32,
    pub combat_timer: f32,
    pub death_tick: Option<u64>,
}

impl CombatantRecord {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Structure-of-arrays combatant storage.
#[derive(Resource, Debug, Clone)]
pub struct Combatants {
    capacity: usize,
    alive: BitVec,

    // Identity
    pub team: Vec<Team>,
    pub role: Vec<Role>,
    pub squad: Vec<u32>,
    pub squad_slot: Vec<u16>,
    pub personality: Vec<Personality>,

    // Spatial
    pub position: Vec<Vec3>,
    /// Velocity resolved by the movement solver this tick.
    pub velocity: Vec<Vec3>,
    /// Smoothed velocity actually applied to the position.
    pub actual_velocity: Vec<Vec3>,
    pub facing: Vec<f32>,

    // Vitals, all 0..1
    pub health: Vec<f32>,
    pub morale: Vec<f32>,
    pub suppression: Vec<f32>,
    pub posture: Vec<Posture>,
    pub posture_target: Vec<Posture>,
    pub posture_timer: Vec<f32>,

    // Combat
    pub target: Vec<Option<EntityId>>,
    /// Current target is only known by last-seen data.
    pub suppressive: Vec<bool>,
    pub aim_point: Vec<Vec3>,
    pub ammo: Vec<u16>,
    pub payload: Vec<PayloadKind>,
    pub cooldown: Vec<f32>,
    pub reload_timer: Vec<f32>,
    pub deploy_timer: Vec<f32>,
    /// Seconds spent below the move-fire speed.
    pub settle_timer: Vec<f32>,

    // Behavior
    pub state: Vec<CombatState>,
    /// State to return to after reloading or a climb/fall.
    pub resume_state: Vec<CombatState>,
    pub mode: Vec<MovementMode>,
    pub decision_timer: Vec<f32>,
    pub order: Vec<Order>,
    /// Destination chosen by the decision engine.
    pub goal: Vec<Option<Vec3>>,
    /// Morale has collapsed and not yet recovered.
    pub broken: Vec<bool>,
    pub frozen_timer: Vec<f32>,
    pub climb_timer: Vec<f32>,
    pub climb_cooldown: Vec<f32>,
    pub climb_target: Vec<f32>,
    /// Cover at the current position against the current threat.
    pub cover: Vec<f32>,
    pub threat_dir: Vec<Vec2>,
    pub aim_quality: Vec<f32>,
    /// Seconds since the combatant last fired or took fire.
    pub combat_timer: Vec<f32>,
    pub death_tick: Vec<Option<u64>>,
}

impl Combatants {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            alive: BitVec::with_capacity(capacity),
            team: Vec::with_capacity(capacity),
            role: Vec::with_capacity(capacity),
            squad: Vec::with_capacity(capacity),
            squad_slot: Vec::with_capacity(capacity),
            personality: Vec::with_capacity(capacity),
            position: Vec::with_capacity(capacity),
            velocity: Vec::with_capacity(capacity),
            actual_velocity: Vec::with_capacity(capacity),
            facing: Vec::with_capacity(capacity),
            health: Vec::with_capacity(capacity),
            morale: Vec::with_capacity(capacity),
            suppression: Vec::with_capacity(capacity),
            posture: Vec::with_capacity(capacity),
            posture_target: Vec::with_capacity(capacity),
            posture_timer: Vec::with_capacity(capacity),
            target: Vec::with_capacity(capacity),
            suppressive: Vec::with_capacity(capacity),
            aim_point: Vec::with_capacity(capacity),
            ammo: Vec::with_capacity(capacity),
            payload: Vec::with_capacity(capacity),
            cooldown: Vec::with_capacity(capacity),
            reload_timer: Vec::with_capacity(capacity),
            deploy_timer: Vec::with_capacity(capacity),
            settle_timer: Vec::with_capacity(capacity),
            state: Vec::with_capacity(capacity),
            resume_state: Vec::with_capacity(capacity),
            mode: Vec::with_capacity(capacity),
            decision_timer: Vec::with_capacity(capacity),
            order: Vec::with_capacity(capacity),
            goal: Vec::with_capacity(capacity),
            broken: Vec::with_capacity(capacity),
            frozen_timer: Vec::with_capacity(capacity),
            climb_timer: Vec::with_capacity(capacity),
            climb_cooldown: Vec::with_capacity(capacity),
            climb_target: Vec::with_capacity(capacity),
            cover: Vec::with_capacity(capacity),
            threat_dir: Vec::with_capacity(capacity),
            aim_quality: Vec::with_capacity(capacity),
            combat_timer: Vec::with_capacity(capacity),
            death_tick: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots handed out so far (alive or dead).
    #[inline]
    pub fn len(&self) -> usize {
        self.team.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.team.is_empty()
    }

    /// Slot exists, regardless of alive state.
    #[inline]
    pub fn is_valid(&self, id: EntityId) -> bool {
        id.index() < self.len()
    }

    #[inline]
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.is_valid(id) && self.alive[id.index()]
    }

    pub fn alive_count(&self) -> usize {
        self.alive.count_ones()
    }

    /// Alive slots in ascending id order.
    pub fn alive_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.alive.iter_ones().map(|i| EntityId(i as u32))
    }

    /// Allocate a new slot. Refused with a warning once capacity is reached.
    pub fn spawn(&mut self, params: SpawnParams, squad_slot: u16) -> Result<EntityId> {
        if self.len() >= self.capacity {
            warn!(
                capacity = self.capacity,
                team = ?params.team,
                "spawn rejected: combatant capacity reached"
            );
            return Err(SimError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        let index = self.len();
        let weapon = params.role.weapon();

        self.alive.push(true);
        self.team.push(params.team);
        self.role.push(params.role);
        self.squad.push(params.squad);
        self.squad_slot.push(squad_slot);
        self.personality.push(params.personality);

        self.position.push(params.position);
        self.velocity.push(Vec3::ZERO);
        self.actual_velocity.push(Vec3::ZERO);
        self.facing.push(params.facing);

        self.health.push(1.0);
        self.morale.push(1.0);
        self.suppression.push(0.0);
        self.posture.push(params.posture);
        self.posture_target.push(params.posture);
        self.posture_timer.push(0.0);

        self.target.push(None);
        self.suppressive.push(false);
        self.aim_point.push(params.position);
        self.ammo.push(weapon.magazine);
        self.payload.push(weapon.payload);
        self.cooldown.push(0.0);
        self.reload_timer.push(0.0);
        self.deploy_timer.push(weapon.deploy_time);
        self.settle_timer.push(0.0);

        self.state.push(CombatState::Idle);
        self.resume_state.push(CombatState::Idle);
        self.mode.push(MovementMode::Walk);
        // Stagger first evaluations across eight phases.
        self.decision_timer.push((index % 8) as f32 * 0.0625);
        self.order.push(Order::hold());
        self.goal.push(None);
        self.broken.push(false);
        self.frozen_timer.push(0.0);
        self.climb_timer.push(0.0);
        self.climb_cooldown.push(0.0);
        self.climb_target.push(params.position.y);
        self.cover.push(0.0);
        self.threat_dir.push(Vec2::ZERO);
        self.aim_quality.push(1.0);
        self.combat_timer.push(f32::MAX);
        self.death_tick.push(None);

        Ok(EntityId(index as u32))
    }

    /// Freeze a slot as dead. Final values stay readable.
    pub fn kill(&mut self, id: EntityId, tick: u64) {
        if !self.is_alive(id) {
            return;
        }
        let i = id.index();
        self.alive.set(i, false);
        self.health[i] = 0.0;
        self.state[i] = CombatState::Dead;
        self.velocity[i] = Vec3::ZERO;
        self.actual_velocity[i] = Vec3::ZERO;
        self.target[i] = None;
        self.goal[i] = None;
        self.death_tick[i] = Some(tick);
    }

    /// Change state, remembering where to resume for transient states.
    pub fn enter_state(&mut self, id: EntityId, state: CombatState) {
        let i = id.index();
        let current = self.state[i];
        if current == state || current == CombatState::Dead {
            return;
        }
        if matches!(
            state,
            CombatState::Reloading | CombatState::Climbing | CombatState::Falling
        ) && !matches!(
            current,
            CombatState::Reloading | CombatState::Climbing | CombatState::Falling
        ) {
            self.resume_state[i] = current;
        }
        self.state[i] = state;
    }

    // ------------------------------------------------------------------
    // Sentinel accessors: invalid or dead ids return neutral values.
    // ------------------------------------------------------------------

    pub fn position(&self, id: EntityId) -> Vec3 {
        if self.is_alive(id) {
            self.position[id.index()]
        } else {
            Vec3::ZERO
        }
    }

    pub fn velocity(&self, id: EntityId) -> Vec3 {
        if self.is_alive(id) {
            self.actual_velocity[id.index()]
        } else {
            Vec3::ZERO
        }
    }

    pub fn facing(&self, id: EntityId) -> f32 {
        if self.is_alive(id) {
            self.facing[id.index()]
        } else {
            0.0
        }
    }

    pub fn health(&self, id: EntityId) -> f32 {
        if self.is_alive(id) {
            self.health[id.index()]
        } else {
            0.0
        }
    }

    pub fn morale(&self, id: EntityId) -> f32 {
        if self.is_alive(id) {
            self.morale[id.index()]
        } else {
            0.0
        }
    }

    pub fn suppression(&self, id: EntityId) -> f32 {
        if self.is_alive(id) {
            self.suppression[id.index()]
        } else {
            0.0
        }
    }

    /// Team index, or -1.
    pub fn team_index(&self, id: EntityId) -> i32 {
        if self.is_alive(id) {
            self.team[id.index()].index() as i32
        } else {
            -1
        }
    }

    pub fn team(&self, id: EntityId) -> Option<Team> {
        self.is_alive(id).then(|| self.team[id.index()])
    }

    pub fn role(&self, id: EntityId) -> Option<Role> {
        self.is_alive(id).then(|| self.role[id.index()])
    }

    /// Squad id, or -1.
    pub fn squad_id(&self, id: EntityId) -> i64 {
        if self.is_alive(id) {
            self.squad[id.index()] as i64
        } else {
            -1
        }
    }

    /// Machine state; invalid and dead ids both read as `Dead`.
    pub fn state(&self, id: EntityId) -> CombatState {
        if self.is_alive(id) {
            self.state[id.index()]
        } else {
            CombatState::Dead
        }
    }

    pub fn posture(&self, id: EntityId) -> Posture {
        if self.is_alive(id) {
            self.posture[id.index()]
        } else {
            Posture::Prone
        }
    }

    pub fn target(&self, id: EntityId) -> Option<EntityId> {
        if self.is_alive(id) {
            self.target[id.index()]
        } else {
            None
        }
    }

    pub fn ammo(&self, id: EntityId) -> u16 {
        if self.is_alive(id) {
            self.ammo[id.index()]
        } else {
            0
        }
    }

    pub fn order(&self, id: EntityId) -> Option<Order> {
        self.is_alive(id).then(|| self.order[id.index()])
    }

    /// Eye position of a combatant in its current posture.
    #[inline]
    pub fn eye(&self, id: EntityId) -> Vec3 {
        let i = id.index();
        self.position[i] + Vec3::Y * self.posture[i].eye_height()
    }

    /// Center of the hit sphere.
    #[inline]
    pub fn body_center(&self, id: EntityId) -> Vec3 {
        let i = id.index();
        self.position[i] + Vec3::Y * self.posture[i].body_center()
    }

    // ------------------------------------------------------------------
    // Record round-trip
    // ------------------------------------------------------------------

    /// Copy out a full slot, including dead ones.
    pub fn record(&self, id: EntityId) -> Option<CombatantRecord> {
        if !self.is_valid(id) {
            return None;
        }
        let i = id.index();
        Some(CombatantRecord {
            alive: self.alive[i],
            team: self.team[i],
            role: self.role[i],
            squad: self.squad[i],
            squad_slot: self.squad_slot[i],
            personality: self.personality[i],
            position: self.position[i],
            velocity: self.velocity[i],
            actual_velocity: self.actual_velocity[i],
            facing: self.facing[i],
            health: self.health[i],
            morale: self.morale[i],
            suppression: self.suppression[i],
            posture: self.posture[i],
            posture_target: self.posture_target[i],
            posture_timer: self.posture_timer[i],
            target: self.target[i],
            suppressive: self.suppressive[i],
            aim_point: self.aim_point[i],
            ammo: self.ammo[i],
            payload: self.payload[i],
            cooldown: self.cooldown[i],
            reload_timer: self.reload_timer[i],
            deploy_timer: self.deploy_timer[i],
            settle_timer: self.settle_timer[i],
            state: self.state[i],
            resume_state: self.resume_state[i],
            mode: self.mode[i],
            decision_timer: self.decision_timer[i],
            order: self.order[i],
            goal: self.goal[i],
            broken: self.broken[i],
            frozen_timer: self.frozen_timer[i],
            climb_timer: self.climb_timer[i],
            climb_cooldown: self.climb_cooldown[i],
            climb_target: self.climb_target[i],
            cover: self.cover[i],
            threat_dir: self.threat_dir[i],
            aim_quality: self.aim_quality[i],
            combat_timer: self.combat_timer[i],
            death_tick: self.death_tick[i],
        })
    }

    /// Overwrite an existing slot from a record.
    pub fn restore(&mut self, id: EntityId, rec: &CombatantRecord) -> Result<()> {
        if !self.is_valid(id) {
            warn!(?id, "restore rejected: slot does not exist");
            return Err(SimError::InvalidEntity(id));
        }
        let i = id.index();
        self.alive.set(i, rec.alive);
        self.team[i] = rec.team;
        self.role[i] = rec.role;
        self.squad[i] = rec.squad;
        self.squad_slot[i] = rec.squad_slot;
        self.personality[i] = rec.personality;
        self.position[i] = rec.position;
        self.velocity[i] = rec.velocity;
        self.actual_velocity[i] = rec.actual_velocity;
        self.facing[i] = rec.facing;
        self.health[i] = rec.health;
        self.morale[i] = rec.morale;
        self.suppression[i] = rec.suppression;
        self.posture[i] = rec.posture;
        self.posture_target[i] = rec.posture_target;
        self.posture_timer[i] = rec.posture_timer;
        self.target[i] = rec.target;
        self.suppressive[i] = rec.suppressive;
        self.aim_point[i] = rec.aim_point;
        self.ammo[i] = rec.ammo;
        self.payload[i] = rec.payload;
        self.cooldown[i] = rec.cooldown;
        self.reload_timer[i] = rec.reload_timer;
        self.deploy_timer[i] = rec.deploy_timer;
        self.settle_timer[i] = rec.settle_timer;
        self.state[i] = rec.state;
        self.resume_state[i] = rec.resume_state;
        self.mode[i] = rec.mode;
        self.decision_timer[i] = rec.decision_timer;
        self.order[i] = rec.order;
        self.goal[i] = rec.goal;
        self.broken[i] = rec.broken;
        self.frozen_timer[i] = rec.frozen_timer;
        self.climb_timer[i] = rec.climb_timer;
        self.climb_cooldown[i] = rec.climb_cooldown;
        self.climb_target[i] = rec.climb_target;
        self.cover[i] = rec.cover;
        self.threat_dir[i] = rec.threat_dir;
        self.aim_quality[i] = rec.aim_quality;
        self.combat_timer[i] = rec.combat_timer;
        self.death_tick[i] = rec.death_tick;
        Ok(())
    }
}

impl Default for Combatants {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}
