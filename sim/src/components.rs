//! Plain data types shared by every stage of the simulation.
//!
//! These are the per-combatant value types stored in the entity store's
//! parallel arrays, plus the static per-role weapon table.

use crate::entity::EntityId;
use glam::Vec3;
use serde::{Deserialize, Serialize};

// ============================================================================
// IDENTITY
// ============================================================================

/// Side a combatant fights for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Team {
    #[default]
    Blue,
    Red,
}

impl Team {
    pub const COUNT: usize = 2;
    pub const ALL: [Team; 2] = [Team::Blue, Team::Red];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Team::Blue => 0,
            Team::Red => 1,
        }
    }

    #[inline]
    pub fn opponent(self) -> Team {
        match self {
            Team::Blue => Team::Red,
            Team::Red => Team::Blue,
        }
    }
}

/// Battlefield role; selects the weapon profile and some decision rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Rifleman,
    Gunner,
    Marksman,
    Grenadier,
    Mortar,
    Medic,
}

/// Static weapon characteristics of a role.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaponProfile {
    /// Range the role prefers to fight at.
    pub optimal_range: f32,
    pub max_range: f32,
    /// Muzzle speed in m/s. Ignored for indirect fire.
    pub muzzle_velocity: f32,
    /// Health removed by a full-energy hit.
    pub damage: f32,
    /// Penetration energy at the muzzle.
    pub penetration: f32,
    /// Half-angle of the base spread cone in radians.
    pub spread: f32,
    pub fire_interval: f32,
    pub magazine: u16,
    pub reload_time: f32,
    /// Time to set up after stopping before the weapon can fire.
    pub deploy_time: f32,
    /// Time stationary before the spread stops shrinking.
    pub settle_time: f32,
    pub payload: PayloadKind,
    pub indirect: bool,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Rifleman,
        Role::Gunner,
        Role::Marksman,
        Role::Grenadier,
        Role::Mortar,
        Role::Medic,
    ];

    pub fn weapon(self) -> WeaponProfile {
        match self {
            Role::Rifleman => WeaponProfile {
                optimal_range: 35.0,
                max_range: 120.0,
                muzzle_velocity: 500.0,
                damage: 0.35,
                penetration: 100.0,
                spread: 0.012,
                fire_interval: 0.6,
                magazine: 30,
                reload_time: 2.5,
                deploy_time: 0.0,
                settle_time: 0.8,
                payload: PayloadKind::Kinetic,
                indirect: false,
            },
            Role::Gunner => WeaponProfile {
                optimal_range: 50.0,
                max_range: 180.0,
                muzzle_velocity: 550.0,
                damage: 0.3,
                penetration: 120.0,
                spread: 0.025,
                fire_interval: 0.12,
                magazine: 100,
                reload_time: 6.0,
                deploy_time: 1.5,
                settle_time: 1.0,
                payload: PayloadKind::Kinetic,
                indirect: false,
            },
            Role::Marksman => WeaponProfile {
                optimal_range: 80.0,
                max_range: 250.0,
                muzzle_velocity: 800.0,
                damage: 0.7,
                penetration: 160.0,
                spread: 0.004,
                fire_interval: 1.8,
                magazine: 8,
                reload_time: 3.0,
                deploy_time: 0.5,
                settle_time: 1.5,
                payload: PayloadKind::Kinetic,
                indirect: false,
            },
            Role::Grenadier => WeaponProfile {
                optimal_range: 30.0,
                max_range: 60.0,
                muzzle_velocity: 60.0,
                damage: 0.2,
                penetration: 20.0,
                spread: 0.03,
                fire_interval: 3.0,
                magazine: 6,
                reload_time: 3.5,
                deploy_time: 0.0,
                settle_time: 0.5,
                payload: PayloadKind::Explosive,
                indirect: false,
            },
            Role::Mortar => WeaponProfile {
                optimal_range: 120.0,
                max_range: 300.0,
                muzzle_velocity: 0.0,
                damage: 0.2,
                penetration: 10.0,
                spread: 0.05,
                fire_interval: 5.0,
                magazine: 12,
                reload_time: 4.0,
                deploy_time: 3.0,
                settle_time: 1.0,
                payload: PayloadKind::Explosive,
                indirect: true,
            },
            Role::Medic => WeaponProfile {
                optimal_range: 20.0,
                max_range: 60.0,
                muzzle_velocity: 400.0,
                damage: 0.25,
                penetration: 80.0,
                spread: 0.02,
                fire_interval: 0.8,
                magazine: 15,
                reload_time: 2.0,
                deploy_time: 0.0,
                settle_time: 0.6,
                payload: PayloadKind::Kinetic,
                indirect: false,
            },
        }
    }

    /// Roles that need a clear line of sight to shoot.
    #[inline]
    pub fn is_direct_fire(self) -> bool {
        !self.weapon().indirect
    }
}

// ============================================================================
// VITALS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Posture {
    #[default]
    Stand,
    Crouch,
    Prone,
}

impl Posture {
    pub fn eye_height(self) -> f32 {
        match self {
            Posture::Stand => 1.6,
            Posture::Crouch => 1.1,
            Posture::Prone => 0.35,
        }
    }

    /// Height of the hit sphere's center above the feet.
    pub fn body_center(self) -> f32 {
        match self {
            Posture::Stand => 1.0,
            Posture::Crouch => 0.7,
            Posture::Prone => 0.2,
        }
    }

    pub fn hit_radius(self) -> f32 {
        match self {
            Posture::Stand => 0.35,
            Posture::Crouch => 0.32,
            Posture::Prone => 0.25,
        }
    }

    /// Spread multiplier when firing from this posture.
    pub fn spread_factor(self) -> f32 {
        match self {
            Posture::Stand => 1.0,
            Posture::Crouch => 0.8,
            Posture::Prone => 0.6,
        }
    }
}

// ============================================================================
// BEHAVIOR
// ============================================================================

/// Decision state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CombatState {
    #[default]
    Idle,
    Moving,
    Engaging,
    InCover,
    Suppressing,
    Flanking,
    Retreating,
    Reloading,
    Downed,
    Berserk,
    Frozen,
    Dead,
    Climbing,
    Falling,
}

impl CombatState {
    /// States in which the weapon may be fired.
    #[inline]
    pub fn is_active_fire(self) -> bool {
        matches!(
            self,
            CombatState::Engaging | CombatState::Suppressing | CombatState::Berserk
        )
    }

    /// States owned by locomotion; decisions wait for them to finish.
    #[inline]
    pub fn is_traversal(self) -> bool {
        matches!(self, CombatState::Climbing | CombatState::Falling)
    }
}

/// Trait that decides how a combatant breaks when morale collapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Personality {
    #[default]
    Steady,
    Berserker,
    Catatonic,
    Paranoid,
}

impl Personality {
    pub const ALL: [Personality; 4] = [
        Personality::Steady,
        Personality::Berserker,
        Personality::Catatonic,
        Personality::Paranoid,
    ];

    /// Morale below this breaks the combatant (before ambient modulation).
    pub fn break_threshold(self) -> f32 {
        match self {
            Personality::Steady => 0.25,
            Personality::Berserker => 0.2,
            Personality::Catatonic => 0.3,
            Personality::Paranoid => 0.25,
        }
    }

    /// Morale needed to leave the break state.
    pub fn recovery_threshold(self) -> f32 {
        match self {
            Personality::Catatonic => 0.5,
            other => other.break_threshold() + 0.2,
        }
    }

    /// State entered on a morale break.
    pub fn break_state(self) -> CombatState {
        match self {
            Personality::Steady => CombatState::Retreating,
            Personality::Berserker => CombatState::Berserk,
            Personality::Catatonic => CombatState::Frozen,
            Personality::Paranoid => CombatState::Engaging,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MovementMode {
    Sneak,
    #[default]
    Walk,
    Run,
    Charge,
}

impl MovementMode {
    pub const ALL: [MovementMode; 4] = [
        MovementMode::Sneak,
        MovementMode::Walk,
        MovementMode::Run,
        MovementMode::Charge,
    ];

    /// Loud enough to be heard beyond visual range.
    #[inline]
    pub fn is_noisy(self) -> bool {
        matches!(self, MovementMode::Run | MovementMode::Charge)
    }
}

/// Order types issued by the strategic layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderKind {
    #[default]
    Hold,
    Move,
    AttackMove,
    Defend,
    Retreat,
    /// Keep the formation slot around the squad's advance point.
    FollowSquad,
}

/// Most recent order for a combatant.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Order {
    pub kind: OrderKind,
    pub target: Vec3,
    pub target_id: Option<EntityId>,
}

impl Order {
    pub fn hold() -> Self {
        Self::default()
    }

    pub fn new(kind: OrderKind, target: Vec3, target_id: Option<EntityId>) -> Self {
        Self {
            kind,
            target,
            target_id,
        }
    }

    /// Orders that name a destination.
    pub fn destination(&self) -> Option<Vec3> {
        match self.kind {
            OrderKind::Move | OrderKind::AttackMove | OrderKind::Defend | OrderKind::Retreat => {
                Some(self.target)
            }
            OrderKind::Hold | OrderKind::FollowSquad => None,
        }
    }
}

/// What a projectile carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PayloadKind {
    #[default]
    Kinetic,
    Explosive,
    Smoke,
    Gas,
}

impl PayloadKind {
    /// Payloads that burst on impact instead of stopping.
    #[inline]
    pub fn bursts(self) -> bool {
        !matches!(self, PayloadKind::Kinetic)
    }
}

/// Squad formation shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Formation {
    #[default]
    Line,
    Column,
    Wedge,
    Skirmish,
}
