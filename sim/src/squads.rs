//! Squad cache: live centroid, alive count, formation and advance data.
//!
//! Squad membership is fixed at spawn. The strategic layer owns what a
//! squad is trying to do; this table only caches what the per-combatant
//! systems need to steer toward formation slots.

use crate::components::{Formation, Team};
use crate::entity::Combatants;
use crate::math::{lift, normalize_or, planar, DEFAULT_DIR};
use bevy_ecs::prelude::*;
use glam::{Vec2, Vec3};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadInfo {
    pub id: u32,
    pub team: Team,
    pub formation: Formation,
    /// Spacing between formation slots.
    pub spread: f32,
    /// Unit planar direction the squad faces while advancing.
    pub advance_dir: Vec2,
    /// Distance ahead of the centroid the formation is anchored.
    pub advance_offset: f32,
    pub rally: Option<Vec3>,
    pub centroid: Vec3,
    pub alive: u32,
    /// Slots handed out so far.
    pub members: u16,
}

impl SquadInfo {
    fn new(id: u32, team: Team) -> Self {
        Self {
            id,
            team,
            formation: Formation::Line,
            spread: 3.0,
            advance_dir: match team {
                Team::Blue => Vec2::X,
                Team::Red => Vec2::NEG_X,
            },
            advance_offset: 0.0,
            rally: None,
            centroid: Vec3::ZERO,
            alive: 0,
            members: 0,
        }
    }

    /// Point the formation is laid out around.
    pub fn anchor(&self) -> Vec2 {
        planar(self.centroid) + self.advance_dir * self.advance_offset
    }

    /// World position of a formation slot.
    pub fn slot_position(&self, slot: u16) -> Vec3 {
        let local = formation_offset(self.formation, slot, self.members.max(1), self.spread);
        let fwd = normalize_or(self.advance_dir, DEFAULT_DIR);
        let side = Vec2::new(-fwd.y, fwd.x);
        lift(self.anchor() + fwd * local.y + side * local.x, self.centroid.y)
    }
}

/// Local `(lateral, forward)` offset of a slot within a formation.
pub fn formation_offset(formation: Formation, slot: u16, count: u16, spread: f32) -> Vec2 {
    let s = slot as f32;
    let mid = (count.saturating_sub(1)) as f32 / 2.0;
    match formation {
        Formation::Line => Vec2::new((s - mid) * spread, 0.0),
        Formation::Column => Vec2::new(0.0, -s * spread),
        Formation::Wedge => {
            if slot == 0 {
                return Vec2::ZERO;
            }
            let rank = ((slot + 1) / 2) as f32;
            let side = if slot % 2 == 1 { -1.0 } else { 1.0 };
            Vec2::new(side * rank * spread, -rank * spread)
        }
        Formation::Skirmish => {
            let stagger = if slot % 2 == 1 { -0.5 * spread } else { 0.0 };
            Vec2::new((s - mid) * spread * 2.0, stagger)
        }
    }
}

#[derive(Resource, Debug, Clone, Default)]
pub struct SquadTable {
    squads: HashMap<u32, SquadInfo>,
}

impl SquadTable {
    pub fn get(&self, id: u32) -> Option<&SquadInfo> {
        self.squads.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut SquadInfo> {
        self.squads.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.squads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.squads.is_empty()
    }

    /// Squads sorted by id.
    pub fn sorted(&self) -> Vec<&SquadInfo> {
        let mut all: Vec<_> = self.squads.values().collect();
        all.sort_by_key(|s| s.id);
        all
    }

    /// Reserve the next formation slot, creating the squad on first use.
    pub fn next_slot(&mut self, id: u32, team: Team) -> u16 {
        let squad = self
            .squads
            .entry(id)
            .or_insert_with(|| SquadInfo::new(id, team));
        let slot = squad.members;
        squad.members = squad.members.saturating_add(1);
        slot
    }

    /// Undo the most recent reservation after a refused spawn.
    pub fn release_slot(&mut self, id: u32) {
        if let Some(squad) = self.squads.get_mut(&id) {
            squad.members = squad.members.saturating_sub(1);
        }
    }

    pub fn slot_position(&self, id: u32, slot: u16) -> Option<Vec3> {
        self.squads.get(&id).map(|s| s.slot_position(slot))
    }

    /// Recompute centroids and alive counts from the entity store.
    pub fn refresh(&mut self, combatants: &Combatants) {
        let mut sums: HashMap<u32, (Vec3, u32)> = HashMap::with_capacity(self.squads.len());
        for id in combatants.alive_ids() {
            let i = id.index();
            let entry = sums.entry(combatants.squad[i]).or_insert((Vec3::ZERO, 0));
            entry.0 += combatants.position[i];
            entry.1 += 1;
        }
        for squad in self.squads.values_mut() {
            match sums.get(&squad.id) {
                Some(&(sum, n)) => {
                    squad.centroid = sum / n as f32;
                    squad.alive = n;
                }
                None => squad.alive = 0,
            }
        }
    }
}

pub fn squad_refresh_system(mut squads: ResMut<SquadTable>, combatants: Res<Combatants>) {
    squads.refresh(&combatants);
}
