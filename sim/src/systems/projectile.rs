//! Projectile pool, ballistics and impacts.
//!
//! Each tick a projectile sweeps the segment it travels. Walls and bodies
//! along that segment are merged into one list ordered by distance and
//! resolved front to back until the round is spent. Bursting payloads
//! queue a [`Detonation`] instead of penetrating.

use crate::components::*;
use crate::config::SimConfig;
use crate::entity::{Combatants, EntityId};
use crate::links::WorldLinks;
use crate::math::{entity_rng, planar, point_segment_distance};
use crate::spatial::SpatialGrid;
use crate::systems::combat::{cone, wound, Wound};
use crate::systems::diagnostics::TickCounters;
use crate::systems::suppression::add_suppression;
use crate::systems::time::{streams, DeltaTime, SimSeed, SimTick};
use crate::terrain::RayHit;
use bevy_ecs::prelude::*;
use glam::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{trace, warn};

/// Energy a body soaks up from a kinetic round.
pub const BODY_RESISTANCE: f32 = 60.0;
/// Suppression from being hit, on top of the wound.
pub const HIT_SUPPRESSION: f32 = 0.25;
/// Deviation after punching through a wall, in radians.
const EXIT_WOBBLE: f32 = 0.03;
/// Voxels probed when measuring wall thickness.
const MAX_THICKNESS: u32 = 6;
/// Extra radius when collecting bodies near a segment.
const QUERY_MARGIN: f32 = 1.0;
/// Pool size used by `SimWorld`.
pub const DEFAULT_POOL: usize = 8192;

/// A round in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    /// Spawn order. Keys every random draw made for this round.
    pub serial: u64,
    pub shooter: EntityId,
    pub team: Team,
    pub position: Vec3,
    pub velocity: Vec3,
    pub damage: f32,
    /// Penetration energy left.
    pub energy: f32,
    /// Penetration energy at the muzzle.
    pub muzzle_energy: f32,
    pub payload: PayloadKind,
    pub lifetime: f32,
    pub suppressive: bool,
    /// Bodies already hit or passed close by.
    pub touched: SmallVec<[EntityId; 4]>,
}

/// Where a bursting payload went off.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detonation {
    pub position: Vec3,
    pub payload: PayloadKind,
    /// Team of the firer, if any.
    pub team: Option<Team>,
    pub shooter: Option<EntityId>,
    /// Keys the random rolls of this blast.
    pub serial: u64,
}

/// Pool of active rounds plus detonations waiting to be resolved.
#[derive(Resource, Debug, Clone)]
pub struct Projectiles {
    pub active: Vec<Projectile>,
    pub detonations: Vec<Detonation>,
    capacity: usize,
    next_serial: u64,
}

impl Default for Projectiles {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_POOL)
    }
}

impl Projectiles {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            active: Vec::with_capacity(capacity.min(1024)),
            detonations: Vec::new(),
            capacity,
            next_serial: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Next serial number, consumed.
    pub fn take_serial(&mut self) -> u64 {
        let s = self.next_serial;
        self.next_serial += 1;
        s
    }

    /// Add a round. Refused when the pool is full.
    pub fn spawn(&mut self, mut p: Projectile) -> bool {
        if self.active.len() >= self.capacity {
            warn!(capacity = self.capacity, "projectile pool full, shot dropped");
            return false;
        }
        p.serial = self.take_serial();
        self.active.push(p);
        true
    }

    /// Queue a blast that is not tied to a round.
    pub fn queue_detonation(
        &mut self,
        position: Vec3,
        payload: PayloadKind,
        team: Option<Team>,
        shooter: Option<EntityId>,
    ) {
        let serial = self.take_serial();
        self.detonations.push(Detonation {
            position,
            payload,
            team,
            shooter,
            serial,
        });
    }
}

/// Something the round meets along its path this tick.
#[derive(Debug, Clone, Copy)]
enum Contact {
    Wall(RayHit),
    Ground(Vec3),
    Body { id: EntityId, miss: f32 },
}

/// Consecutive solid voxels behind an entry point, at least one.
fn wall_thickness(links: &WorldLinks, hit: &RayHit, dir: Vec3) -> u32 {
    let step = links.voxel_size();
    let start = hit.position + dir * step * 0.5;
    let mut n = 1;
    while n < MAX_THICKNESS && links.is_solid(links.voxel_at(start + dir * step * n as f32)) {
        n += 1;
    }
    n
}

/// What happened to a round this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flight {
    Flying,
    Spent,
    Detonated,
}

/// Advance one round by `dt` and resolve everything it meets.
#[allow(clippy::too_many_arguments)]
pub fn fly(
    p: &mut Projectile,
    combatants: &mut Combatants,
    grid: &SpatialGrid,
    links: &WorldLinks,
    config: &SimConfig,
    seed: u64,
    tick: u64,
    dt: f32,
    detonations: &mut Vec<Detonation>,
    counters: &mut TickCounters,
) -> Flight {
    p.lifetime -= dt;
    let from = p.position;
    p.velocity.y -= config.gravity * dt;
    let to = from + p.velocity * dt;
    let travel = to - from;
    let len = travel.length();
    if len < 1e-6 {
        return Flight::Spent;
    }
    let dir = travel / len;

    let mut contacts: SmallVec<[(f32, Contact); 16]> = SmallVec::new();
    for hit in links.raycast_multi(from, dir, len) {
        contacts.push((hit.distance, Contact::Wall(hit)));
    }
    if links.terrain.is_none() && to.y < 0.0 && from.y >= 0.0 {
        let f = from.y / (from.y - to.y);
        contacts.push((len * f, Contact::Ground(from + travel * f)));
    }

    let mut near = Vec::new();
    let mid = planar((from + to) * 0.5);
    grid.query_radius_into(mid, len * 0.5 + config.near_miss_radius + QUERY_MARGIN, &mut near);
    for id in near {
        if id == p.shooter || !combatants.is_alive(id) || p.touched.contains(&id) {
            continue;
        }
        let (miss, t) = point_segment_distance(combatants.body_center(id), from, to);
        if miss <= config.near_miss_radius {
            contacts.push((t * len, Contact::Body { id, miss }));
        }
    }
    contacts.sort_by(|a, b| {
        a.0.total_cmp(&b.0).then_with(|| contact_key(&a.1).cmp(&contact_key(&b.1)))
    });

    let mut heading = dir;
    for (distance, contact) in contacts {
        match contact {
            Contact::Ground(at) => {
                return impact(p, at, heading, detonations, counters);
            }
            Contact::Wall(hit) => {
                if p.payload.bursts() {
                    return impact(p, hit.position, heading, detonations, counters);
                }
                let thickness = wall_thickness(links, &hit, heading);
                p.energy -= hit.material.resistance() * thickness as f32;
                if p.energy <= 0.0 {
                    counters.wall_blocks += 1;
                    trace!(serial = p.serial, material = ?hit.material, "round stopped by wall");
                    return Flight::Spent;
                }
                let mut rng = entity_rng(seed, tick, p.serial as u32, streams::PENETRATION);
                heading = cone(heading, EXIT_WOBBLE, &mut rng);
                p.velocity = heading * p.velocity.length() * (p.energy / p.muzzle_energy).sqrt();
            }
            Contact::Body { id, miss } => {
                p.touched.push(id);
                let i = id.index();
                let radius = combatants.posture[i].hit_radius();
                if miss > radius {
                    // A body in the line of fire is struck whatever its team;
                    // only enemy fire passing close pins a combatant down.
                    if combatants.team[i] != p.team {
                        near_miss(combatants, config, i, heading);
                        counters.near_misses += 1;
                    }
                    continue;
                }
                let at = from + dir * distance;
                if p.payload.bursts() {
                    return impact(p, at, heading, detonations, counters);
                }
                if deflected(combatants, links, config, seed, tick, p, i, heading) {
                    near_miss(combatants, config, i, heading);
                    counters.deflections += 1;
                    return Flight::Spent;
                }
                let damage = p.damage * (p.energy / p.muzzle_energy).clamp(0.0, 1.0);
                let outcome = wound(combatants, grid, config, id, damage, Some(p.shooter), tick);
                add_suppression(combatants, i, HIT_SUPPRESSION);
                face_threat(combatants, i, heading);
                counters.hits += 1;
                if outcome == Wound::Killed {
                    counters.deaths += 1;
                }
                p.energy -= BODY_RESISTANCE;
                if p.energy <= 0.0 {
                    return Flight::Spent;
                }
            }
        }
    }

    p.position = to;
    if p.lifetime <= 0.0 {
        if p.payload.bursts() {
            return impact(p, to, heading, detonations, counters);
        }
        return Flight::Spent;
    }
    Flight::Flying
}

fn contact_key(c: &Contact) -> u32 {
    match c {
        Contact::Wall(_) | Contact::Ground(_) => 0,
        Contact::Body { id, .. } => id.0.saturating_add(1),
    }
}

fn impact(
    p: &Projectile,
    at: Vec3,
    heading: Vec3,
    detonations: &mut Vec<Detonation>,
    counters: &mut TickCounters,
) -> Flight {
    if !p.payload.bursts() {
        counters.wall_blocks += 1;
        return Flight::Spent;
    }
    detonations.push(Detonation {
        // Back off the surface so the blast is not inside the wall.
        position: at - heading * 0.1,
        payload: p.payload,
        team: Some(p.team),
        shooter: Some(p.shooter),
        serial: p.serial,
    });
    Flight::Detonated
}

#[allow(clippy::too_many_arguments)]
fn deflected(
    combatants: &Combatants,
    links: &WorldLinks,
    config: &SimConfig,
    seed: u64,
    tick: u64,
    p: &Projectile,
    i: usize,
    heading: Vec3,
) -> bool {
    let cover = links.cover_value(combatants.position[i], planar(-heading).normalize_or_zero());
    let chance = (cover * config.cover_deflect_factor).clamp(0.0, 1.0);
    if chance <= 0.0 {
        return false;
    }
    let stream = streams::DEFLECT ^ (p.serial << 8);
    entity_rng(seed, tick, i as u32, stream).gen::<f32>() < chance
}

fn near_miss(combatants: &mut Combatants, config: &SimConfig, i: usize, heading: Vec3) {
    add_suppression(combatants, i, config.near_miss_suppression);
    face_threat(combatants, i, heading);
}

fn face_threat(combatants: &mut Combatants, i: usize, heading: Vec3) {
    combatants.combat_timer[i] = 0.0;
    let back = planar(-heading);
    if back.length_squared() > 1e-6 {
        combatants.threat_dir[i] = back.normalize();
    }
}

pub fn projectile_system(
    dt: Res<DeltaTime>,
    tick: Res<SimTick>,
    seed: Res<SimSeed>,
    config: Res<SimConfig>,
    links: Res<WorldLinks>,
    grid: Res<SpatialGrid>,
    mut combatants: ResMut<Combatants>,
    mut projectiles: ResMut<Projectiles>,
    mut counters: ResMut<TickCounters>,
) {
    let mut pool = std::mem::take(&mut projectiles.active);
    let mut detonations = std::mem::take(&mut projectiles.detonations);
    pool.retain_mut(|p| {
        fly(
            p,
            &mut combatants,
            &grid,
            &links,
            &config,
            seed.0,
            tick.0,
            dt.0,
            &mut detonations,
            &mut counters,
        ) == Flight::Flying
    });
    projectiles.active = pool;
    projectiles.detonations = detonations;
}
