//! Target acquisition and scoring.
//!
//! Candidates come from the spatial grid. A visible enemy is a direct
//! target aimed at its body. An enemy only seen or heard recently is a
//! suppressive target aimed at its last known position, and only when the
//! shooter can see that position (indirect-fire roles excepted).

use crate::components::Role;
use crate::config::SimConfig;
use crate::entity::{Combatants, EntityId};
use crate::links::WorldLinks;
use crate::math::{gaussian, normalize_or, planar, DEFAULT_DIR};
use crate::spatial::SpatialGrid;
use crate::stigmergy::Channel;
use crate::systems::hazards::Hazards;
use crate::systems::perception::{has_line_of_sight, FogOfWar};
use glam::Vec3;

const W_RANGE: f32 = 0.35;
const W_THREAT: f32 = 0.25;
const W_EXPOSURE: f32 = 0.2;
const W_WOUND: f32 = 0.1;
const W_HEIGHT: f32 = 0.05;
const W_DISTANCE: f32 = 0.05;
const W_INTEL: f32 = 0.05;
/// Score multiplier for targets known only by last-seen data.
const SUPPRESSIVE_FACTOR: f32 = 0.5;
/// Height difference at which the height terms saturate.
const HEIGHT_SCALE: f32 = 4.0;
/// Stale points are aimed at chest height.
const STALE_AIM_HEIGHT: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetChoice {
    pub id: EntityId,
    pub score: f32,
    pub suppressive: bool,
    pub aim_point: Vec3,
}

/// Read-only world view shared by every scoring call in a tick.
#[derive(Clone, Copy)]
pub struct TargetingView<'a> {
    pub combatants: &'a Combatants,
    pub grid: &'a SpatialGrid,
    pub fog: &'a FogOfWar,
    pub links: &'a WorldLinks,
    pub hazards: &'a Hazards,
    pub config: &'a SimConfig,
    pub now: f64,
}

/// Outcome of a scan, with the sight tests it cost.
#[derive(Debug, Clone, Copy, Default)]
pub struct Acquisition {
    pub best: Option<TargetChoice>,
    pub los_checks: u32,
}

/// Radius a role scans for candidates.
pub fn scan_radius(role: Role, config: &SimConfig) -> f32 {
    let weapon = role.weapon();
    if weapon.indirect {
        weapon.max_range
    } else {
        config.detection_radius.min(weapon.max_range)
    }
}

/// Score of one candidate before the suppressive and stickiness terms.
///
/// `seen_at` is where the shooter's team believes the enemy stands: its
/// true feet position when visible, the last known one otherwise.
pub fn score_candidate(
    view: &TargetingView,
    shooter: EntityId,
    enemy: EntityId,
    aim: Vec3,
    seen_at: Vec3,
    scan: f32,
) -> f32 {
    let c = view.combatants;
    let si = shooter.index();
    let ei = enemy.index();
    let weapon = c.role[si].weapon();

    let from = c.position[si];
    let dist = planar(aim).distance(planar(from));
    let range = gaussian(dist, weapon.optimal_range, weapon.optimal_range * 0.5);

    let threat = if c.target[ei] == Some(shooter) { 1.0 } else { 0.0 };

    let height = ((from.y - seen_at.y) / HEIGHT_SCALE).clamp(-1.0, 1.0);
    let toward_me = normalize_or(planar(from) - planar(aim), DEFAULT_DIR);
    let cover = view.links.cover_value(seen_at, toward_me);
    // Firing from above defeats part of the cover.
    let effective_cover = cover * (1.0 - height.max(0.0) * 0.5);
    let exposure = 1.0 - effective_cover;

    // Wounds only show on a body in view.
    let in_view = view.fog.is_visible(c.team[si], enemy);
    let wound = if in_view { 1.0 - c.health[ei] } else { 0.0 };
    let closeness = 1.0 - (dist / scan.max(1.0)).min(1.0);
    let intel = view
        .links
        .sample(c.position[ei], Channel::Contact)
        .clamp(0.0, 1.0);

    W_RANGE * range
        + W_THREAT * threat
        + W_EXPOSURE * exposure
        + W_WOUND * wound
        + W_HEIGHT * height
        + W_DISTANCE * closeness
        + W_INTEL * intel
}

/// Best target for `shooter`, if any candidate qualifies.
pub fn acquire_target(view: &TargetingView, shooter: EntityId) -> Acquisition {
    let c = view.combatants;
    let si = shooter.index();
    let team = c.team[si];
    let role = c.role[si];
    let indirect = role.weapon().indirect;
    let scan = scan_radius(role, view.config);
    let eye = c.eye(shooter);
    let previous = c.target[si];

    let mut acq = Acquisition::default();
    let mut candidates: Vec<EntityId> = Vec::new();
    view.grid
        .query_team_into(planar(eye), scan, team.opponent(), &mut candidates);
    // Stable order keeps results independent of grid layout.
    candidates.sort_unstable();

    for enemy in candidates {
        let (aim, seen_at, suppressive) = if view.fog.is_visible(team, enemy) {
            (c.body_center(enemy), c.position[enemy.index()], false)
        } else if view
            .fog
            .recently_seen(enemy, view.now, view.config.seen_decay)
        {
            let Some(stale) = view.fog.last_known(enemy) else {
                continue;
            };
            let stale_aim = stale + Vec3::Y * STALE_AIM_HEIGHT;
            if !indirect {
                acq.los_checks += 1;
                if !has_line_of_sight(view.links, view.hazards, eye, stale_aim) {
                    continue;
                }
            }
            (stale_aim, stale, true)
        } else {
            continue;
        };

        let mut score = score_candidate(view, shooter, enemy, aim, seen_at, scan);
        if suppressive {
            score *= SUPPRESSIVE_FACTOR;
        }
        if previous == Some(enemy) {
            score += view.config.target_stickiness;
        }

        let better = match acq.best {
            None => true,
            Some(b) => score > b.score,
        };
        if better {
            acq.best = Some(TargetChoice {
                id: enemy,
                score,
                suppressive,
                aim_point: aim,
            });
        }
    }
    acq
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Team;
    use crate::entity::SpawnParams;
    use crate::terrain::{Material, VoxelTerrain};
    use glam::Vec2;
    use std::sync::Arc;

    struct Fixture {
        combatants: Combatants,
        grid: SpatialGrid,
        fog: FogOfWar,
        links: WorldLinks,
        hazards: Hazards,
        config: SimConfig,
    }

    impl Fixture {
        fn new(spots: &[(Team, Role, f32, f32)]) -> Self {
            let config = SimConfig::default();
            let mut combatants = Combatants::with_capacity(16);
            for (k, &(team, role, x, z)) in spots.iter().enumerate() {
                combatants
                    .spawn(SpawnParams::new(team, role, k as u32, Vec3::new(x, 0.0, z)), 0)
                    .unwrap();
            }
            let mut grid = SpatialGrid::new(128.0, 128.0, 8.0, 16);
            grid.rebuild(&combatants);
            Self {
                combatants,
                grid,
                fog: FogOfWar::with_capacity(16),
                links: WorldLinks::default(),
                hazards: Hazards::default(),
                config,
            }
        }

        fn view(&self, now: f64) -> TargetingView<'_> {
            TargetingView {
                combatants: &self.combatants,
                grid: &self.grid,
                fog: &self.fog,
                links: &self.links,
                hazards: &self.hazards,
                config: &self.config,
                now,
            }
        }

        fn see(&mut self, team: Team, id: EntityId, now: f64) {
            let pos = self.combatants.position[id.index()];
            self.fog.mark_seen(team, id, pos, now);
        }
    }

    #[test]
    fn test_invisible_enemy_is_ignored() {
        let f = Fixture::new(&[
            (Team::Blue, Role::Rifleman, 0.0, 0.0),
            (Team::Red, Role::Rifleman, 10.0, 0.0),
        ]);
        assert!(acquire_target(&f.view(0.0), EntityId(0)).best.is_none());
    }

    #[test]
    fn test_visible_enemy_is_direct_target() {
        let mut f = Fixture::new(&[
            (Team::Blue, Role::Rifleman, 0.0, 0.0),
            (Team::Red, Role::Rifleman, 10.0, 0.0),
        ]);
        f.see(Team::Blue, EntityId(1), 0.0);
        let best = acquire_target(&f.view(0.0), EntityId(0)).best.unwrap();
        assert_eq!(best.id, EntityId(1));
        assert!(!best.suppressive);
        assert!(best.score >= f.config.engage_threshold);
    }

    #[test]
    fn test_stale_contact_needs_sight_of_last_known_point() {
        let mut f = Fixture::new(&[
            (Team::Blue, Role::Rifleman, 0.0, 0.0),
            (Team::Red, Role::Rifleman, 20.0, 0.0),
            (Team::Blue, Role::Mortar, -1.0, 0.0),
        ]);
        f.see(Team::Blue, EntityId(1), 0.0);
        // Two refreshes with no new sightings clear the published bit.
        f.fog.refresh();
        f.fog.refresh();
        assert!(!f.fog.is_visible(Team::Blue, EntityId(1)));
        let mut terrain = VoxelTerrain::flat(64, 64, 1.0, 0);
        terrain.add_wall(Vec2::new(10.0, -6.0), Vec2::new(10.0, 6.0), 4, Material::Brick);
        f.links.terrain = Some(Arc::new(terrain));

        let acq = acquire_target(&f.view(1.0), EntityId(0));
        assert!(acq.best.is_none());
        assert_eq!(acq.los_checks, 1);

        // Indirect fire skips the sight test.
        let mortar = acquire_target(&f.view(1.0), EntityId(2)).best.unwrap();
        assert!(mortar.suppressive);
        assert_eq!(mortar.id, EntityId(1));

        // Once the wall is gone the rifleman may suppress the stale point.
        f.links.terrain = None;
        let best = acquire_target(&f.view(1.0), EntityId(0)).best.unwrap();
        assert!(best.suppressive);

        // Past the decay window the contact is forgotten.
        assert!(acquire_target(&f.view(100.0), EntityId(0)).best.is_none());
    }

    #[test]
    fn test_stale_contact_scored_where_last_seen() {
        let mut f = Fixture::new(&[
            (Team::Blue, Role::Rifleman, 0.0, 0.0),
            (Team::Red, Role::Rifleman, 20.0, 0.0),
        ]);
        f.see(Team::Blue, EntityId(1), 0.0);
        f.fog.refresh();
        f.fog.refresh();
        let before = acquire_target(&f.view(1.0), EntityId(0)).best.unwrap();
        assert!(before.suppressive);

        // Unseen, the enemy climbs and gets hurt; the score must not notice.
        f.combatants.position[1].y = 4.0;
        f.combatants.health[1] = 0.3;
        let after = acquire_target(&f.view(1.0), EntityId(0)).best.unwrap();
        assert_eq!(after.score, before.score);
        assert_eq!(after.aim_point, before.aim_point);
    }

    #[test]
    fn test_reciprocal_threat_and_stickiness() {
        let mut f = Fixture::new(&[
            (Team::Blue, Role::Rifleman, 0.0, 0.0),
            (Team::Red, Role::Rifleman, 20.0, 5.0),
            (Team::Red, Role::Rifleman, 20.0, -5.0),
        ]);
        f.see(Team::Blue, EntityId(1), 0.0);
        f.see(Team::Blue, EntityId(2), 0.0);
        // Symmetric positions: equal scores resolve to the lower id.
        assert_eq!(acquire_target(&f.view(0.0), EntityId(0)).best.unwrap().id, EntityId(1));

        f.combatants.target[2] = Some(EntityId(0));
        assert_eq!(acquire_target(&f.view(0.0), EntityId(0)).best.unwrap().id, EntityId(2));

        f.combatants.target[2] = None;
        f.combatants.target[0] = Some(EntityId(2));
        assert_eq!(acquire_target(&f.view(0.0), EntityId(0)).best.unwrap().id, EntityId(2));
    }

    #[test]
    fn test_range_preference_by_role() {
        let mut f = Fixture::new(&[
            (Team::Blue, Role::Marksman, 0.0, 0.0),
            (Team::Red, Role::Rifleman, 8.0, 0.0),
            (Team::Red, Role::Rifleman, 55.0, 0.0),
        ]);
        f.see(Team::Blue, EntityId(1), 0.0);
        f.see(Team::Blue, EntityId(2), 0.0);
        // Marksmen prefer the distant target near their optimal range.
        assert_eq!(acquire_target(&f.view(0.0), EntityId(0)).best.unwrap().id, EntityId(2));
    }
}
