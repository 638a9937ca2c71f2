//! Tactical position search: cover spots and flank destinations.

use crate::config::SimConfig;
use crate::entity::EntityId;
use crate::math::{from_heading, lift, normalize_or, planar, DEFAULT_DIR};
use crate::stigmergy::Channel;
use crate::systems::perception::has_line_of_sight;
use crate::systems::targeting::TargetingView;
use glam::{Vec2, Vec3};
use std::f32::consts::{FRAC_PI_6, TAU};

const RINGS: usize = 4;
const SPOKES: usize = 8;
/// Candidates with less cover than this are not considered.
const MIN_COVER: f32 = 0.3;
/// Enemies checked for shoot-ability from a candidate.
const SHOOT_SAMPLES: usize = 3;
const FIELD_OF_FIRE_RANGE: f32 = 15.0;
const CROUCH_EYE: f32 = 1.1;
const STAND_EYE: f32 = 1.6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverSpot {
    pub position: Vec3,
    pub cover: f32,
    pub score: f32,
}

/// Result of a search plus the sight tests spent on it.
#[derive(Debug, Clone, Copy)]
pub struct Search<T> {
    pub found: Option<T>,
    pub los_checks: u32,
}

impl<T> Default for Search<T> {
    fn default() -> Self {
        Self {
            found: None,
            los_checks: 0,
        }
    }
}

fn in_bounds(p: Vec2, config: &SimConfig) -> bool {
    p.x.abs() <= config.world_half_width && p.y.abs() <= config.world_half_height
}

/// Best nearby spot that protects against `threat_dir`.
///
/// Scores cover, how many known enemies can be shot from the spot, the
/// field of fire toward the threat, height advantage, travel distance and
/// ambient danger. Returns `None` when nothing beats `current_cover`.
pub fn find_cover(
    view: &TargetingView,
    id: EntityId,
    threat_dir: Vec2,
    current_cover: f32,
) -> Search<CoverSpot> {
    let c = view.combatants;
    let i = id.index();
    let here = c.position[i];
    let team = c.team[i];
    let radius = view.config.cover_search_radius.max(1.0);
    let threat_dir = normalize_or(threat_dir, DEFAULT_DIR);

    let mut search = Search::default();
    if view.links.cover.is_none() {
        return search;
    }

    let mut enemies = Vec::new();
    view.grid.query_team_into(
        planar(here),
        view.config.detection_radius,
        team.opponent(),
        &mut enemies,
    );
    enemies.retain(|e| view.fog.is_visible(team, *e));
    enemies.sort_by(|a, b| {
        let da = planar(c.position[a.index()]).distance_squared(planar(here));
        let db = planar(c.position[b.index()]).distance_squared(planar(here));
        da.total_cmp(&db).then(a.cmp(b))
    });
    enemies.truncate(SHOOT_SAMPLES);

    for ring in 1..=RINGS {
        let r = radius * ring as f32 / RINGS as f32;
        // Offset alternate rings by half a spoke.
        let phase = if ring % 2 == 0 { TAU / (2 * SPOKES) as f32 } else { 0.0 };
        for spoke in 0..SPOKES {
            let dir = from_heading(phase + TAU * spoke as f32 / SPOKES as f32);
            let flat = planar(here) + dir * r;
            if !in_bounds(flat, view.config) {
                continue;
            }
            let ground = view.links.ground_height(flat.x, flat.y, here.y);
            let p = lift(flat, ground);
            if view.links.is_solid(view.links.voxel_at(p + Vec3::Y * 0.5)) {
                continue;
            }

            let cover = view.links.cover_value(p, threat_dir);
            if cover < MIN_COVER || cover <= current_cover + 0.1 {
                continue;
            }

            let eye = p + Vec3::Y * CROUCH_EYE;
            let mut shootable = 0;
            for e in &enemies {
                search.los_checks += 1;
                if has_line_of_sight(view.links, view.hazards, eye, c.eye(*e)) {
                    shootable += 1;
                }
            }
            let shoot = if enemies.is_empty() {
                0.5
            } else {
                shootable as f32 / enemies.len() as f32
            };

            let stand_eye = p + Vec3::Y * STAND_EYE;
            let mut open = 0;
            for k in [-1.0, 0.0, 1.0] {
                let ray = Vec2::from_angle(k * FRAC_PI_6).rotate(threat_dir);
                let probe = stand_eye + Vec3::new(ray.x, 0.0, ray.y) * FIELD_OF_FIRE_RANGE;
                search.los_checks += 1;
                if view.links.check_los(stand_eye, probe) {
                    open += 1;
                }
            }
            let field_of_fire = open as f32 / 3.0;

            let height = ((ground - here.y) / 4.0).clamp(-1.0, 1.0);
            let travel = r / radius;
            let danger = view.links.sample(p, Channel::Danger).clamp(0.0, 1.0);

            let score = 0.45 * cover + 0.2 * shoot + 0.1 * field_of_fire + 0.1 * height
                - 0.15 * travel
                - 0.1 * danger;

            let better = search.found.map_or(true, |b: CoverSpot| score > b.score);
            if better {
                search.found = Some(CoverSpot {
                    position: p,
                    cover,
                    score,
                });
            }
        }
    }
    search
}

/// Side position from which to hit `target` while allies pin it.
///
/// Prefers the flank with the stronger flank-opportunity signal and the
/// weaker danger signal, and a clear line to the target. `None` when the
/// destination would be too close to be worth the move.
pub fn find_flank(view: &TargetingView, id: EntityId, target: Vec3) -> Search<Vec3> {
    let c = view.combatants;
    let here = c.position[id.index()];
    let config = view.config;
    let to_target = normalize_or(planar(target) - planar(here), DEFAULT_DIR);
    let side_axis = Vec2::new(-to_target.y, to_target.x);

    let mut search = Search::default();
    let mut best: Option<(f32, Vec3)> = None;
    for side in [1.0, -1.0] {
        let flat = planar(target) - to_target * (config.flank_distance * 0.4)
            + side_axis * side * config.flank_distance;
        if !in_bounds(flat, config) {
            continue;
        }
        if flat.distance(planar(here)) < config.flank_min_distance {
            continue;
        }
        let ground = view.links.ground_height(flat.x, flat.y, here.y);
        let p = lift(flat, ground);
        if view.links.is_solid(view.links.voxel_at(p + Vec3::Y * 0.5)) {
            continue;
        }
        search.los_checks += 1;
        let clear = has_line_of_sight(
            view.links,
            view.hazards,
            p + Vec3::Y * STAND_EYE,
            target + Vec3::Y * 1.0,
        );
        let score = view.links.sample(p, Channel::FlankOpportunity)
            - view.links.sample(p, Channel::Danger)
            + if clear { 0.5 } else { 0.0 };
        if best.map_or(true, |(s, _)| score > s) {
            best = Some((score, p));
        }
    }
    search.found = best.map(|(_, p)| p);
    search
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Role, Team};
    use crate::entity::{Combatants, SpawnParams};
    use crate::links::WorldLinks;
    use crate::spatial::SpatialGrid;
    use crate::systems::hazards::Hazards;
    use crate::systems::perception::FogOfWar;
    use crate::terrain::{Material, VoxelTerrain};
    use std::sync::Arc;

    fn fixture(links: WorldLinks) -> (Combatants, SpatialGrid, FogOfWar, WorldLinks, Hazards, SimConfig) {
        let mut c = Combatants::with_capacity(8);
        c.spawn(SpawnParams::new(Team::Blue, Role::Rifleman, 0, Vec3::ZERO), 0)
            .unwrap();
        c.spawn(SpawnParams::new(Team::Red, Role::Rifleman, 1, Vec3::new(30.0, 0.0, 0.0)), 0)
            .unwrap();
        let mut grid = SpatialGrid::new(64.0, 64.0, 8.0, 8);
        grid.rebuild(&c);
        (c, grid, FogOfWar::with_capacity(8), links, Hazards::default(), SimConfig::default())
    }

    #[test]
    fn test_no_cover_collaborator_means_no_spot() {
        let (c, grid, fog, links, hazards, config) = fixture(WorldLinks::default());
        let view = TargetingView {
            combatants: &c,
            grid: &grid,
            fog: &fog,
            links: &links,
            hazards: &hazards,
            config: &config,
            now: 0.0,
        };
        assert!(find_cover(&view, EntityId(0), Vec2::X, 0.0).found.is_none());
    }

    #[test]
    fn test_finds_spot_behind_wall() {
        let mut terrain = VoxelTerrain::flat(64, 64, 1.0, 0);
        terrain.add_wall(Vec2::new(6.0, -2.0), Vec2::new(6.0, 2.0), 2, Material::Brick);
        let terrain = Arc::new(terrain);
        let links = WorldLinks {
            terrain: Some(terrain.clone()),
            cover: Some(terrain),
            ..Default::default()
        };
        let (c, grid, fog, links, hazards, config) = fixture(links);
        let view = TargetingView {
            combatants: &c,
            grid: &grid,
            fog: &fog,
            links: &links,
            hazards: &hazards,
            config: &config,
            now: 0.0,
        };
        let spot = find_cover(&view, EntityId(0), Vec2::X, 0.0).found.unwrap();
        assert!(spot.cover >= 0.6);
        assert!(spot.position.x < 6.0 && spot.position.x > 3.0);
    }

    #[test]
    fn test_flank_goes_to_the_side() {
        let (c, grid, fog, links, hazards, config) = fixture(WorldLinks::default());
        let view = TargetingView {
            combatants: &c,
            grid: &grid,
            fog: &fog,
            links: &links,
            hazards: &hazards,
            config: &config,
            now: 0.0,
        };
        let dest = find_flank(&view, EntityId(0), Vec3::new(30.0, 0.0, 0.0)).found.unwrap();
        assert!(dest.z.abs() > config.flank_distance * 0.9);
        assert!(dest.x < 30.0);
    }

    #[test]
    fn test_flank_too_short_is_rejected() {
        let (c, grid, fog, links, hazards, mut config) = fixture(WorldLinks::default());
        config.flank_min_distance = 100.0;
        let view = TargetingView {
            combatants: &c,
            grid: &grid,
            fog: &fog,
            links: &links,
            hazards: &hazards,
            config: &config,
            now: 0.0,
        };
        let search = find_flank(&view, EntityId(0), Vec3::new(30.0, 0.0, 0.0));
        assert!(search.found.is_none());
        assert_eq!(search.los_checks, 0);
    }
}
