//! Render/debug snapshot.
//!
//! A `Snapshot` is a read-only, serializable copy of what a renderer needs
//! after a tick: every alive combatant, plus those that died during that
//! tick (state `Dead`), each team's fog-of-war view of its opponents, the
//! rounds in flight and the hazard clouds.

use crate::components::*;
use crate::entity::{Combatants, EntityId};
use crate::error::Result;
use crate::systems::diagnostics::TickCounters;
use crate::systems::hazards::{HazardKind, Hazards};
use crate::systems::perception::FogOfWar;
use crate::systems::projectile::Projectiles;
use crate::systems::time::{SimTick, SimTime};
use bevy_ecs::prelude::*;
use glam::Vec3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatantSnapshot {
    pub id: u32,
    pub team: Team,
    pub role: Role,
    pub squad: u32,
    pub position: Vec3,
    pub facing: f32,
    pub state: CombatState,
    pub posture: Posture,
    pub health: f32,
    pub morale: f32,
    pub suppression: f32,
    pub target: Option<u32>,
}

/// An opposing unit as one team knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SightingSnapshot {
    pub id: u32,
    /// Currently in view.
    pub visible: bool,
    /// Simulation time of the last sighting.
    pub last_seen: f64,
    pub last_known: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FogSnapshot {
    pub team: Team,
    pub sightings: Vec<SightingSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileSnapshot {
    pub position: Vec3,
    pub velocity: Vec3,
    pub team: Team,
    pub payload: PayloadKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardSnapshot {
    pub kind: HazardKind,
    pub center: Vec3,
    pub radius: f32,
    pub remaining: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Ticks completed.
    pub tick: u64,
    /// Elapsed simulation time in seconds.
    pub time: f64,
    pub combatants: Vec<CombatantSnapshot>,
    pub fog: Vec<FogSnapshot>,
    pub projectiles: Vec<ProjectileSnapshot>,
    pub hazards: Vec<HazardSnapshot>,
    /// Counters of the tick just completed.
    pub counters: TickCounters,
}

fn combatant(c: &Combatants, id: EntityId) -> CombatantSnapshot {
    let i = id.index();
    CombatantSnapshot {
        id: id.0,
        team: c.team[i],
        role: c.role[i],
        squad: c.squad[i],
        position: c.position[i],
        facing: c.facing[i],
        state: c.state[i],
        posture: c.posture[i],
        health: c.health[i],
        morale: c.morale[i],
        suppression: c.suppression[i],
        target: c.target[i].map(|t| t.0),
    }
}

/// Opponents `team` has ever seen, with their current visibility.
fn fog_view(c: &Combatants, fog: &FogOfWar, team: Team) -> FogSnapshot {
    let sightings = (0..c.len())
        .map(|i| EntityId(i as u32))
        .filter(|&id| c.is_alive(id) && c.team[id.index()] != team)
        .filter_map(|id| {
            let last_seen = *fog.last_seen_time.get(id.index())?;
            last_seen.is_finite().then(|| SightingSnapshot {
                id: id.0,
                visible: fog.is_visible(team, id),
                last_seen,
                last_known: fog.last_known(id).unwrap_or_default(),
            })
        })
        .collect();
    FogSnapshot { team, sightings }
}

impl Snapshot {
    /// Capture the state of a world after a completed tick.
    pub fn capture(world: &World) -> Self {
        let tick = world.get_resource::<SimTick>().map_or(0, |t| t.0);
        let time = world.get_resource::<SimTime>().map_or(0.0, |t| t.0);
        let mut snapshot = Snapshot {
            tick,
            time,
            counters: world.get_resource::<TickCounters>().copied().unwrap_or_default(),
            ..Default::default()
        };

        let Some(c) = world.get_resource::<Combatants>() else {
            return snapshot;
        };
        // Deaths are stamped with the tick number before it advanced.
        let last_tick = tick.checked_sub(1);
        snapshot.combatants = (0..c.len())
            .map(|i| EntityId(i as u32))
            .filter(|&id| c.is_alive(id) || (last_tick.is_some() && c.death_tick[id.index()] == last_tick))
            .map(|id| combatant(c, id))
            .collect();

        if let Some(fog) = world.get_resource::<FogOfWar>() {
            snapshot.fog = Team::ALL.iter().map(|&t| fog_view(c, fog, t)).collect();
        }
        if let Some(pool) = world.get_resource::<Projectiles>() {
            snapshot.projectiles = pool
                .active
                .iter()
                .map(|p| ProjectileSnapshot {
                    position: p.position,
                    velocity: p.velocity,
                    team: p.team,
                    payload: p.payload,
                })
                .collect();
        }
        if let Some(hazards) = world.get_resource::<Hazards>() {
            snapshot.hazards = hazards
                .clouds
                .iter()
                .map(|h| HazardSnapshot {
                    kind: h.kind,
                    center: h.center,
                    radius: h.radius,
                    remaining: h.remaining,
                })
                .collect();
        }
        snapshot
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn get(&self, id: EntityId) -> Option<&CombatantSnapshot> {
        self.combatants.iter().find(|c| c.id == id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::SpawnParams;

    fn world() -> World {
        let mut world = World::new();
        let mut c = Combatants::with_capacity(4);
        for (k, team) in [Team::Blue, Team::Red, Team::Red].into_iter().enumerate() {
            c.spawn(
                SpawnParams::new(team, Role::Rifleman, k as u32, Vec3::new(k as f32 * 10.0, 0.0, 0.0)),
                0,
            )
            .unwrap();
        }
        world.insert_resource(c);
        world.insert_resource(SimTick(5));
        world.insert_resource(SimTime(5.0 / 30.0));
        world.insert_resource(FogOfWar::with_capacity(4));
        world
    }

    #[test]
    fn test_dead_listed_only_on_their_tick() {
        let mut w = world();
        w.resource_mut::<Combatants>().kill(EntityId(1), 4);
        w.resource_mut::<Combatants>().kill(EntityId(2), 2);
        let snap = Snapshot::capture(&w);
        assert_eq!(snap.combatants.len(), 2);
        assert_eq!(snap.get(EntityId(1)).unwrap().state, CombatState::Dead);
        assert!(snap.get(EntityId(2)).is_none());
    }

    #[test]
    fn test_fog_lists_seen_opponents() {
        let mut w = world();
        w.resource_mut::<FogOfWar>()
            .mark_seen(Team::Blue, EntityId(1), Vec3::new(10.0, 0.0, 0.0), 0.1);
        let snap = Snapshot::capture(&w);
        let blue = snap.fog.iter().find(|f| f.team == Team::Blue).unwrap();
        assert_eq!(blue.sightings.len(), 1);
        assert!(blue.sightings[0].visible);
        assert_eq!(blue.sightings[0].id, 1);
        let red = snap.fog.iter().find(|f| f.team == Team::Red).unwrap();
        assert!(red.sightings.is_empty());
    }

    #[test]
    fn test_json_round_trip() {
        let snap = Snapshot::capture(&world());
        let json = snap.to_json().unwrap();
        assert!(json.contains("\"Rifleman\""));
        assert_eq!(Snapshot::from_json(&json).unwrap(), snap);
    }
}
