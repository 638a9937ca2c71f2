//! Fog of war.
//!
//! Each team owns one bit per combatant slot meaning "this team currently
//! sees that enemy". Every tick a round-robin batch of observers tests the
//! enemies around them; a sighting sets the bit immediately. Sightings are
//! also collected into a second bitset, and on every refresh interval that
//! second set replaces the published one. An enemy nobody re-confirms
//! during an interval therefore drops out at the next refresh, while one
//! that stays in view is never cleared.
//!
//! The batch grows with the roster so one sweep over all slots always
//! finishes inside a refresh interval.

use super::gather;
use crate::components::Team;
use crate::config::SimConfig;
use crate::entity::{Combatants, EntityId};
use crate::links::WorldLinks;
use crate::math::planar;
use crate::spatial::SpatialGrid;
use crate::systems::diagnostics::TickCounters;
use crate::systems::hazards::Hazards;
use crate::systems::time::{DeltaTime, SimTime};
use bevy_ecs::prelude::*;
use bitvec::prelude::*;
use glam::Vec3;
use tracing::trace;

/// Seconds after firing during which a combatant can be heard.
const GUNFIRE_AUDIBLE: f32 = 1.0;

/// Speed below which a noisy movement mode makes no sound.
const SILENT_SPEED: f32 = 0.3;

#[derive(Resource, Debug, Clone)]
pub struct FogOfWar {
    visible: [BitVec; Team::COUNT],
    pending: [BitVec; Team::COUNT],
    cursor: usize,
    ticks_since_refresh: u32,
    /// Last time any enemy saw or heard this slot.
    pub last_seen_time: Vec<f64>,
    pub last_known_position: Vec<Vec3>,
}

impl FogOfWar {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            visible: [bitvec![0; capacity], bitvec![0; capacity]],
            pending: [bitvec![0; capacity], bitvec![0; capacity]],
            cursor: 0,
            ticks_since_refresh: 0,
            last_seen_time: vec![f64::NEG_INFINITY; capacity],
            last_known_position: vec![Vec3::ZERO; capacity],
        }
    }

    /// `team` currently sees slot `id`.
    #[inline]
    pub fn is_visible(&self, team: Team, id: EntityId) -> bool {
        self.visible[team.index()]
            .get(id.index())
            .map(|b| *b)
            .unwrap_or(false)
    }

    /// Seconds since the slot was last seen or heard, `None` if never.
    pub fn seen_age(&self, id: EntityId, now: f64) -> Option<f64> {
        let t = *self.last_seen_time.get(id.index())?;
        t.is_finite().then(|| (now - t).max(0.0))
    }

    /// Seen or heard within `window` seconds.
    pub fn recently_seen(&self, id: EntityId, now: f64, window: f32) -> bool {
        self.seen_age(id, now)
            .is_some_and(|age| age <= window as f64)
    }

    pub fn last_known(&self, id: EntityId) -> Option<Vec3> {
        self.last_known_position.get(id.index()).copied()
    }

    /// Ids `team` currently sees.
    pub fn visible_ids(&self, team: Team) -> impl Iterator<Item = EntityId> + '_ {
        self.visible[team.index()]
            .iter_ones()
            .map(|i| EntityId(i as u32))
    }

    pub(crate) fn mark_seen(&mut self, team: Team, enemy: EntityId, pos: Vec3, now: f64) {
        let i = enemy.index();
        self.visible[team.index()].set(i, true);
        self.pending[team.index()].set(i, true);
        self.last_seen_time[i] = now;
        self.last_known_position[i] = pos;
    }

    fn mark_heard(&mut self, enemy: EntityId, pos: Vec3, now: f64) {
        let i = enemy.index();
        self.last_seen_time[i] = now;
        self.last_known_position[i] = pos;
    }

    /// Publish everything confirmed since the last refresh.
    pub(crate) fn refresh(&mut self) {
        for t in 0..Team::COUNT {
            let pending = std::mem::replace(
                &mut self.pending[t],
                bitvec![0; self.visible[t].len()],
            );
            self.visible[t] = pending;
        }
        self.cursor = 0;
        self.ticks_since_refresh = 0;
    }

    /// Forget every sighting, as for a fresh battle.
    pub fn reset(&mut self) {
        for t in 0..Team::COUNT {
            self.visible[t].fill(false);
            self.pending[t].fill(false);
        }
        self.last_seen_time.fill(f64::NEG_INFINITY);
        self.cursor = 0;
        self.ticks_since_refresh = 0;
    }
}

impl Default for FogOfWar {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}

/// Combined sight test: terrain and smoke.
#[inline]
pub fn has_line_of_sight(links: &WorldLinks, hazards: &Hazards, from: Vec3, to: Vec3) -> bool {
    !hazards.blocks_sight(from, to) && links.check_los(from, to)
}

/// A combatant is making noise this tick.
#[inline]
fn is_noisy(combatants: &Combatants, i: usize) -> bool {
    let moving_loudly = combatants.mode[i].is_noisy()
        && combatants.actual_velocity[i].length_squared() > SILENT_SPEED * SILENT_SPEED;
    let firing = combatants.state[i].is_active_fire() && combatants.combat_timer[i] < GUNFIRE_AUDIBLE;
    moving_loudly || firing
}

#[derive(Debug, Clone, Copy)]
enum Contact {
    Seen(EntityId),
    Heard(EntityId),
}

struct ObserverResult {
    team: Team,
    contacts: Vec<Contact>,
    los_checks: u32,
}

fn observe(
    observer: EntityId,
    combatants: &Combatants,
    grid: &SpatialGrid,
    links: &WorldLinks,
    hazards: &Hazards,
    config: &SimConfig,
) -> ObserverResult {
    let i = observer.index();
    let team = combatants.team[i];
    let enemy_team = team.opponent();
    let eye = combatants.eye(observer);
    let sight_sq = config.detection_radius * config.detection_radius;
    let reach = config.detection_radius.max(config.acoustic_radius);

    let mut result = ObserverResult {
        team,
        contacts: Vec::new(),
        los_checks: 0,
    };

    grid.for_each_in_radius(planar(eye), reach, |enemy, _, t, d_sq| {
        if t != enemy_team {
            return;
        }
        if d_sq <= sight_sq {
            result.los_checks += 1;
            if has_line_of_sight(links, hazards, eye, combatants.eye(enemy)) {
                result.contacts.push(Contact::Seen(enemy));
                return;
            }
        }
        if is_noisy(combatants, enemy.index()) {
            let acoustic_sq = config.acoustic_radius * config.acoustic_radius;
            if d_sq <= acoustic_sq {
                result.contacts.push(Contact::Heard(enemy));
            }
        }
    });
    result
}

/// Process one observer batch and publish on refresh boundaries.
pub fn perception_system(
    dt: Res<DeltaTime>,
    now: Res<SimTime>,
    config: Res<SimConfig>,
    combatants: Res<Combatants>,
    grid: Res<SpatialGrid>,
    links: Res<WorldLinks>,
    hazards: Res<Hazards>,
    mut fog: ResMut<FogOfWar>,
    mut counters: ResMut<TickCounters>,
) {
    let slots = combatants.len();
    if slots == 0 {
        return;
    }

    let refresh_ticks = ((config.perception_refresh_interval / dt.0.max(1e-4)).floor() as u32).max(1);
    let sweep = slots.div_ceil(refresh_ticks as usize);
    let batch = (config.perception_batch_size.max(1.0) as usize).max(sweep).min(slots);

    let mut observers = Vec::with_capacity(batch);
    for k in 0..batch {
        let id = EntityId(((fog.cursor + k) % slots) as u32);
        if combatants.is_alive(id) {
            observers.push(id);
        }
    }
    fog.cursor = (fog.cursor + batch) % slots;

    let (store, grid, links, hazards, cfg) = (&*combatants, &*grid, &*links, &*hazards, &*config);
    let results = gather(&observers, |&id| observe(id, store, grid, links, hazards, cfg));

    let t = now.0;
    for r in results {
        counters.los_checks += r.los_checks;
        for contact in r.contacts {
            match contact {
                Contact::Seen(e) => fog.mark_seen(r.team, e, combatants.position[e.index()], t),
                Contact::Heard(e) => fog.mark_heard(e, combatants.position[e.index()], t),
            }
        }
    }

    fog.ticks_since_refresh += 1;
    if fog.ticks_since_refresh >= refresh_ticks {
        trace!(tick_time = t, "fog of war refresh");
        fog.refresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{MovementMode, Role};
    use crate::entity::SpawnParams;
    use crate::spatial::spatial_grid_update_system;
    use crate::terrain::{Material, VoxelTerrain};
    use glam::Vec2;
    use std::sync::Arc;

    fn setup(positions: &[(Team, f32, f32)], links: WorldLinks) -> World {
        let mut world = World::new();
        let config = SimConfig::default();
        world.insert_resource(DeltaTime(config.fixed_timestep));
        world.insert_resource(SimTime(0.0));
        let mut c = Combatants::with_capacity(64);
        for (k, &(team, x, z)) in positions.iter().enumerate() {
            c.spawn(SpawnParams::new(team, Role::Rifleman, k as u32, Vec3::new(x, 0.0, z)), 0)
                .unwrap();
        }
        world.insert_resource(SpatialGrid::new(
            config.world_half_width,
            config.world_half_height,
            config.spatial_cell_size,
            64,
        ));
        world.insert_resource(config);
        world.insert_resource(c);
        world.insert_resource(links);
        world.insert_resource(Hazards::default());
        world.insert_resource(FogOfWar::with_capacity(64));
        world.insert_resource(TickCounters::default());
        world
    }

    fn schedule() -> Schedule {
        let mut s = Schedule::default();
        s.add_systems((spatial_grid_update_system, perception_system).chain());
        s
    }

    #[test]
    fn test_clear_sight_sets_bit_same_tick() {
        let mut world = setup(&[(Team::Blue, 0.0, 0.0), (Team::Red, 10.0, 0.0)], WorldLinks::default());
        schedule().run(&mut world);
        let fog = world.resource::<FogOfWar>();
        assert!(fog.is_visible(Team::Blue, EntityId(1)));
        assert!(fog.is_visible(Team::Red, EntityId(0)));
        assert!(world.resource::<TickCounters>().los_checks >= 2);
    }

    #[test]
    fn test_visibility_has_no_gaps_across_refresh() {
        let mut world = setup(&[(Team::Blue, 0.0, 0.0), (Team::Red, 10.0, 0.0)], WorldLinks::default());
        let mut s = schedule();
        let ticks = (SimConfig::default().perception_refresh_interval
            / SimConfig::default().fixed_timestep) as usize
            * 3;
        for _ in 0..ticks {
            s.run(&mut world);
            world.resource_mut::<SimTime>().0 += 1.0 / 30.0;
            assert!(world.resource::<FogOfWar>().is_visible(Team::Blue, EntityId(1)));
        }
    }

    #[test]
    fn test_no_gaps_with_small_batches() {
        // Many observers, tiny configured batch: the sweep must still cover
        // everyone between refreshes.
        let mut spots = vec![(Team::Red, 10.0, 0.0)];
        for k in 0..40 {
            spots.push((Team::Blue, -(k as f32) * 0.5, 0.0));
        }
        let mut world = setup(&spots, WorldLinks::default());
        world.resource_mut::<SimConfig>().perception_batch_size = 1.0;
        world.resource_mut::<SimConfig>().perception_refresh_interval = 0.5;
        let mut s = schedule();
        // Let one full sweep land first.
        for _ in 0..15 {
            s.run(&mut world);
        }
        for _ in 0..60 {
            s.run(&mut world);
            assert!(world.resource::<FogOfWar>().is_visible(Team::Blue, EntityId(0)));
        }
    }

    #[test]
    fn test_wall_blocks_sight_and_lost_contact_expires() {
        let mut terrain = VoxelTerrain::flat(64, 64, 1.0, 0);
        terrain.add_wall(Vec2::new(5.0, -6.0), Vec2::new(5.0, 6.0), 4, Material::Concrete);
        let links = WorldLinks {
            terrain: Some(Arc::new(terrain)),
            ..Default::default()
        };
        let mut world = setup(&[(Team::Blue, 0.0, 0.0), (Team::Red, 10.0, 0.0)], links);
        let mut s = schedule();
        s.run(&mut world);
        assert!(!world.resource::<FogOfWar>().is_visible(Team::Blue, EntityId(1)));
        assert!(!world.resource::<FogOfWar>().recently_seen(EntityId(1), 0.0, 6.0));
    }

    #[test]
    fn test_heard_updates_last_known_without_bit() {
        let mut terrain = VoxelTerrain::flat(64, 64, 1.0, 0);
        terrain.add_wall(Vec2::new(5.0, -6.0), Vec2::new(5.0, 6.0), 4, Material::Concrete);
        let links = WorldLinks {
            terrain: Some(Arc::new(terrain)),
            ..Default::default()
        };
        let mut world = setup(&[(Team::Blue, 0.0, 0.0), (Team::Red, 10.0, 0.0)], links);
        {
            let mut c = world.resource_mut::<Combatants>();
            c.mode[1] = MovementMode::Run;
            c.actual_velocity[1] = Vec3::new(0.0, 0.0, 4.0);
        }
        world.resource_mut::<SimTime>().0 = 3.0;
        schedule().run(&mut world);
        let fog = world.resource::<FogOfWar>();
        assert!(!fog.is_visible(Team::Blue, EntityId(1)));
        assert_eq!(fog.seen_age(EntityId(1), 3.0), Some(0.0));
        assert_eq!(fog.last_known(EntityId(1)), Some(Vec3::new(10.0, 0.0, 0.0)));
    }

    #[test]
    fn test_smoke_blocks_sight() {
        let mut world = setup(&[(Team::Blue, 0.0, 0.0), (Team::Red, 20.0, 0.0)], WorldLinks::default());
        world.resource_mut::<Hazards>().spawn(
            crate::systems::hazards::HazardKind::Smoke,
            Vec3::new(10.0, 1.0, 0.0),
            3.0,
            30.0,
        );
        schedule().run(&mut world);
        assert!(!world.resource::<FogOfWar>().is_visible(Team::Blue, EntityId(1)));
    }
}
