//! Decision engine.
//!
//! Each combatant re-evaluates on its own staggered timer. An evaluation
//! runs a fixed priority cascade and the first rule that applies wins:
//!
//! 1. morale break (personality decides the break state)
//! 2. seek cover
//! 3. suppressive fire
//! 4. flanking
//! 5. engage
//! 6. squad cohesion
//! 7. hold or resume the order
//!
//! Evaluation only reads the world. Results are gathered for every due
//! combatant first, in parallel with the `parallel` feature, then applied
//! in id order.

use super::gather;
use crate::components::*;
use crate::config::SimConfig;
use crate::entity::{Combatants, EntityId};
use crate::links::WorldLinks;
use crate::math::{lift, normalize_or, planar, DEFAULT_DIR};
use crate::spatial::SpatialGrid;
use crate::squads::SquadTable;
use crate::stigmergy::Channel;
use crate::systems::diagnostics::TickCounters;
use crate::systems::hazards::Hazards;
use crate::systems::morale::break_threshold;
use crate::systems::perception::FogOfWar;
use crate::systems::tactical::{find_cover, find_flank};
use crate::systems::targeting::{acquire_target, TargetChoice, TargetingView};
use crate::systems::time::{DeltaTime, SimTime};
use bevy_ecs::prelude::*;
use glam::{Vec2, Vec3};
use tracing::trace;

/// How far a retreat without a rally point runs.
const RETREAT_DISTANCE: f32 = 30.0;
/// Cover below this counts as exposed.
const EXPOSED_COVER: f32 = 0.3;
/// Seconds after the last shot during which the hold score keeps a bonus.
const RECENT_COMBAT: f32 = 5.0;
/// Order distance above which units run instead of walk.
const RUN_DISTANCE: f32 = 30.0;

/// Everything an evaluation reads.
#[derive(Clone, Copy)]
pub struct DecisionView<'a> {
    pub targeting: TargetingView<'a>,
    pub squads: &'a SquadTable,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub state: CombatState,
    pub target: Option<EntityId>,
    pub suppressive: bool,
    pub aim_point: Option<Vec3>,
    pub goal: Option<Vec3>,
    pub mode: MovementMode,
    pub posture: Posture,
    pub broken: bool,
    pub los_checks: u32,
}

impl Decision {
    fn new(state: CombatState) -> Self {
        Self {
            state,
            target: None,
            suppressive: false,
            aim_point: None,
            goal: None,
            mode: MovementMode::Walk,
            posture: Posture::Stand,
            broken: false,
            los_checks: 0,
        }
    }

    fn aiming(mut self, choice: &TargetChoice) -> Self {
        self.target = Some(choice.id);
        self.suppressive = choice.suppressive;
        self.aim_point = Some(choice.aim_point);
        self
    }

    fn toward(mut self, goal: Vec3, mode: MovementMode) -> Self {
        self.goal = Some(goal);
        self.mode = mode;
        self
    }

    fn posture(mut self, posture: Posture) -> Self {
        self.posture = posture;
        self
    }
}

/// Posture a role takes while firing.
fn firing_posture(role: Role) -> Posture {
    match role {
        Role::Gunner | Role::Marksman | Role::Mortar => Posture::Prone,
        _ => Posture::Crouch,
    }
}

/// Direction the main threat comes from, if one is known.
fn threat_direction(view: &TargetingView, id: EntityId) -> Option<Vec2> {
    let c = view.combatants;
    let i = id.index();
    if c.threat_dir[i].length_squared() > 0.01 {
        return Some(c.threat_dir[i]);
    }
    let team = c.team[i];
    let here = planar(c.position[i]);
    view.grid
        .nearest(here, view.config.detection_radius, |e, t| {
            t == team.opponent() && view.fog.is_visible(team, e)
        })
        .map(|e| normalize_or(planar(c.position[e.index()]) - here, DEFAULT_DIR))
}

/// Where a broken or retreating combatant runs to.
fn retreat_point(view: &DecisionView, id: EntityId) -> Vec3 {
    let c = view.targeting.combatants;
    let config = view.targeting.config;
    let i = id.index();
    if let Some(rally) = view.squads.get(c.squad[i]).and_then(|s| s.rally) {
        return rally;
    }
    let here = c.position[i];
    let away = match threat_direction(&view.targeting, id) {
        Some(dir) => -dir,
        // Fall back toward the team's own side.
        None => match c.team[i] {
            Team::Blue => Vec2::NEG_X,
            Team::Red => Vec2::X,
        },
    };
    let flat = planar(here) + away * RETREAT_DISTANCE;
    let flat = Vec2::new(
        flat.x.clamp(-config.world_half_width, config.world_half_width),
        flat.y.clamp(-config.world_half_height, config.world_half_height),
    );
    lift(flat, here.y)
}

fn break_decision(view: &DecisionView, id: EntityId) -> Decision {
    let tv = &view.targeting;
    let c = tv.combatants;
    let i = id.index();
    let team = c.team[i];
    let here = planar(c.position[i]);
    let personality = c.personality[i];
    let mut d = Decision::new(personality.break_state());
    d.broken = true;

    match personality {
        Personality::Steady => {
            d = d.toward(retreat_point(view, id), MovementMode::Run);
        }
        Personality::Berserker => {
            // Nearest visible enemy, regardless of range or cover.
            let victim = tv.grid.nearest(here, tv.config.detection_radius * 2.0, |e, t| {
                t == team.opponent() && tv.fog.is_visible(team, e)
            });
            if let Some(e) = victim {
                d.target = Some(e);
                d.aim_point = Some(c.body_center(e));
                d = d.toward(c.position[e.index()], MovementMode::Charge);
            } else {
                d.mode = MovementMode::Charge;
            }
        }
        Personality::Catatonic => {
            d = d.posture(Posture::Prone);
        }
        Personality::Paranoid => {
            let ally = tv.grid.nearest(here, tv.config.detection_radius, |e, t| {
                t == team && e != id
            });
            if let Some(a) = ally {
                d.target = Some(a);
                d.aim_point = Some(c.body_center(a));
            }
            d = d.posture(Posture::Crouch);
        }
    }
    d
}

/// Allies within detection range firing at `target`, and whether one of
/// my squad is already flanking it.
fn allies_on_target(view: &TargetingView, id: EntityId, target: EntityId) -> (usize, bool) {
    let c = view.combatants;
    let i = id.index();
    let mut firing = 0;
    let mut squad_flanking = false;
    view.grid.for_each_in_radius(
        planar(c.position[i]),
        view.config.detection_radius,
        |a, _, t, _| {
            if a == id || t != c.team[i] || c.target[a.index()] != Some(target) {
                return;
            }
            match c.state[a.index()] {
                CombatState::Engaging | CombatState::Suppressing | CombatState::Berserk => {
                    firing += 1
                }
                CombatState::Flanking if c.squad[a.index()] == c.squad[i] => squad_flanking = true,
                _ => {}
            }
        },
    );
    (firing, squad_flanking)
}

fn hold_score(view: &TargetingView, i: usize) -> f32 {
    let c = view.combatants;
    let weapon = c.role[i].weapon();
    let recent = if c.combat_timer[i] < RECENT_COMBAT {
        1.0 - c.combat_timer[i] / RECENT_COMBAT
    } else {
        0.0
    };
    // Leaving a set-up weapon throws away the deploy and settle time.
    let setup_cost = if c.deploy_timer[i] <= 0.0 {
        ((weapon.deploy_time + weapon.settle_time) / 4.0).min(1.0)
    } else {
        0.0
    };
    0.4 * c.cover[i] + 0.3 * recent + 0.2 * setup_cost + 0.1 * c.aim_quality[i]
}

fn move_score(distance: f32) -> f32 {
    (distance / 10.0).clamp(0.0, 1.5)
}

/// Where the current order wants the combatant, if anywhere.
fn order_destination(view: &DecisionView, i: usize) -> Option<Vec3> {
    let c = view.targeting.combatants;
    let order = c.order[i];
    match order.kind {
        OrderKind::FollowSquad => view.squads.slot_position(c.squad[i], c.squad_slot[i]),
        _ => order.destination(),
    }
}

/// Run the priority cascade for one combatant.
pub fn evaluate(view: &DecisionView, id: EntityId) -> Decision {
    let tv = &view.targeting;
    let c = tv.combatants;
    let config = tv.config;
    let i = id.index();
    let pos = c.position[i];
    let role = c.role[i];
    let personality = c.personality[i];
    let order = c.order[i];

    // 1. Morale break.
    let fear = tv.links.sample(pos, Channel::Fear);
    let courage = tv.links.sample(pos, Channel::Courage);
    let threshold = break_threshold(personality, fear, courage, config);
    let morale = c.morale[i];
    let still_broken = c.broken[i] && morale < personality.recovery_threshold();
    let still_frozen = c.state[i] == CombatState::Frozen && c.frozen_timer[i] > 0.0;
    if morale < threshold || still_broken || still_frozen {
        return break_decision(view, id);
    }

    let mut los_checks = 0;
    let current_cover = c.cover[i];

    // 2. Seek cover.
    let pressed = c.suppression[i] >= config.cover_seek_suppression
        || c.health[i] < config.cover_seek_health;
    let poor_shot = c.aim_quality[i] < config.poor_aim_quality && current_cover < EXPOSED_COVER;
    if (pressed && current_cover < config.cover_good_enough) || poor_shot {
        if let Some(dir) = threat_direction(tv, id) {
            let search = find_cover(tv, id, dir, current_cover);
            los_checks += search.los_checks;
            if let Some(spot) = search.found {
                let mode = if c.suppression[i] >= config.cover_seek_suppression {
                    MovementMode::Run
                } else {
                    MovementMode::Walk
                };
                let mut d = Decision::new(CombatState::InCover)
                    .toward(spot.position, mode)
                    .posture(Posture::Crouch);
                // Keep the current target so firing resumes once in cover.
                d.target = c.target[i];
                d.aim_point = Some(c.aim_point[i]);
                d.suppressive = c.suppressive[i];
                d.los_checks = los_checks;
                return d;
            }
        }
    }

    let acquisition = if order.kind == OrderKind::Retreat {
        Default::default()
    } else {
        acquire_target(tv, id)
    };
    los_checks += acquisition.los_checks;

    if let Some(choice) = acquisition.best {
        let (allies_firing, squad_flanking) = allies_on_target(tv, id, choice.id);

        // 3. Suppressive fire.
        let role_suppresses = matches!(role, Role::Gunner | Role::Mortar);
        let coordinated =
            squad_flanking || allies_firing >= config.suppress_allies_on_target as usize;
        if role != Role::Medic && (choice.suppressive || role_suppresses || coordinated) {
            let mut d = Decision::new(CombatState::Suppressing)
                .aiming(&choice)
                .posture(firing_posture(role));
            d.los_checks = los_checks;
            return d;
        }

        // 4. Flanking.
        let target_pos = c.position[choice.id.index()];
        if c.state[i] == CombatState::Flanking {
            if let Some(goal) = c.goal[i] {
                if planar(goal).distance(planar(pos)) > config.steer_arrive_radius * 2.0 {
                    let mut d = Decision::new(CombatState::Flanking)
                        .aiming(&choice)
                        .toward(goal, MovementMode::Run);
                    d.los_checks = los_checks;
                    return d;
                }
            }
        }
        let ambient = tv.links.sample(target_pos, Channel::Suppression);
        let needed = if ambient >= config.flank_ambient_suppression { 1 } else { 2 };
        if role.is_direct_fire() && role != Role::Marksman && !squad_flanking && allies_firing >= needed
        {
            let search = find_flank(tv, id, target_pos);
            los_checks += search.los_checks;
            if let Some(dest) = search.found {
                let mut d = Decision::new(CombatState::Flanking)
                    .aiming(&choice)
                    .toward(dest, MovementMode::Run);
                d.los_checks = los_checks;
                return d;
            }
        }

        // 5. Engage.
        let threshold = if order.kind == OrderKind::AttackMove {
            config.attack_move_engage_threshold
        } else {
            config.engage_threshold
        };
        if choice.score >= threshold {
            let mut d = Decision::new(CombatState::Engaging)
                .aiming(&choice)
                .posture(firing_posture(role));
            d.los_checks = los_checks;
            return d;
        }
    }

    // 6. Squad cohesion.
    if let Some(squad) = tv.combatants.squad.get(i).and_then(|s| view.squads.get(*s)) {
        if squad.alive > 1 {
            let here = planar(pos);
            if here.distance(planar(squad.centroid)) > config.formation_leash {
                let mate = tv.grid.nearest(here, config.formation_max_leash * 2.0, |e, t| {
                    e != id && t == c.team[i] && c.squad[e.index()] == c.squad[i]
                });
                let dest = mate.map_or(squad.centroid, |m| c.position[m.index()]);
                if here.distance(planar(dest)) > config.formation_leash {
                    let mode = if here.distance(planar(dest)) > config.formation_max_leash {
                        MovementMode::Run
                    } else {
                        MovementMode::Walk
                    };
                    let mut d = Decision::new(CombatState::Moving).toward(dest, mode);
                    d.los_checks = los_checks;
                    return d;
                }
            }
        }
    }

    // 7. Hold or move.
    let settled_state = if current_cover >= config.cover_good_enough {
        CombatState::InCover
    } else {
        CombatState::Idle
    };
    let settled_posture = if settled_state == CombatState::InCover {
        Posture::Crouch
    } else {
        Posture::Stand
    };
    let mut d = match order_destination(view, i) {
        Some(dest) => {
            let distance = planar(dest).distance(planar(pos));
            let arrived = distance <= config.steer_arrive_radius * 2.0;
            let leash = order.kind == OrderKind::Defend && distance <= config.formation_leash;
            let wants_move = match order.kind {
                OrderKind::Retreat => !arrived,
                _ => !arrived && !leash && move_score(distance) > hold_score(tv, i),
            };
            if wants_move {
                let mode = match order.kind {
                    OrderKind::Retreat => MovementMode::Run,
                    OrderKind::AttackMove => MovementMode::Walk,
                    OrderKind::FollowSquad if distance > config.formation_max_leash => {
                        MovementMode::Run
                    }
                    OrderKind::Move if distance > RUN_DISTANCE => MovementMode::Run,
                    _ => MovementMode::Walk,
                };
                Decision::new(CombatState::Moving).toward(dest, mode)
            } else {
                Decision::new(settled_state).posture(settled_posture)
            }
        }
        None => Decision::new(settled_state).posture(settled_posture),
    };
    d.los_checks = los_checks;
    d
}

/// Seconds until the next evaluation; shorter under contact.
pub fn next_interval(config: &SimConfig, contact: f32) -> f32 {
    let speedup = config.decision_contact_speedup.clamp(0.0, 0.95) * contact.clamp(0.0, 1.0);
    (config.decision_interval * (1.0 - speedup)).max(0.05)
}

/// Write a decision back into the store.
pub fn apply_decision(
    combatants: &mut Combatants,
    config: &SimConfig,
    id: EntityId,
    d: &Decision,
) {
    let i = id.index();
    let before = combatants.state[i];

    // A break takes effect even mid-reload; anything else waits for it.
    if before == CombatState::Reloading && !d.broken {
        combatants.resume_state[i] = d.state;
    } else {
        if d.state == CombatState::Frozen && before != CombatState::Frozen {
            combatants.frozen_timer[i] = config.frozen_duration;
        }
        combatants.enter_state(id, d.state);
    }
    if before != combatants.state[i] {
        trace!(?id, from = ?before, to = ?combatants.state[i], "state transition");
    }

    if d.target != combatants.target[i] {
        // A fresh target means the aim has to settle again.
        combatants.aim_quality[i] = combatants.aim_quality[i].min(0.5);
    }
    combatants.target[i] = d.target;
    combatants.suppressive[i] = d.suppressive;
    if let Some(aim) = d.aim_point {
        combatants.aim_point[i] = aim;
        let dir = planar(aim) - planar(combatants.position[i]);
        if dir.length_squared() > 1e-4 {
            combatants.threat_dir[i] = dir.normalize();
        }
    }
    combatants.goal[i] = d.goal;
    combatants.mode[i] = d.mode;
    combatants.posture_target[i] = d.posture;
    combatants.broken[i] = d.broken;
}

pub fn decision_system(
    dt: Res<DeltaTime>,
    now: Res<SimTime>,
    config: Res<SimConfig>,
    grid: Res<SpatialGrid>,
    fog: Res<FogOfWar>,
    links: Res<WorldLinks>,
    hazards: Res<Hazards>,
    squads: Res<SquadTable>,
    mut combatants: ResMut<Combatants>,
    mut counters: ResMut<TickCounters>,
) {
    let delta = dt.0;
    let mut due = Vec::new();
    let ids: Vec<EntityId> = combatants.alive_ids().collect();
    for id in ids {
        let i = id.index();
        combatants.decision_timer[i] -= delta;
        let state = combatants.state[i];
        if combatants.decision_timer[i] > 0.0
            || state.is_traversal()
            || state == CombatState::Downed
        {
            continue;
        }
        due.push(id);
    }
    if due.is_empty() {
        return;
    }

    let view = DecisionView {
        targeting: TargetingView {
            combatants: &*combatants,
            grid: &*grid,
            fog: &*fog,
            links: &*links,
            hazards: &*hazards,
            config: &*config,
            now: now.0,
        },
        squads: &*squads,
    };
    let decisions = gather(&due, |&id| evaluate(&view, id));

    for (id, d) in due.iter().zip(decisions.iter()) {
        counters.decisions += 1;
        counters.los_checks += d.los_checks;
        if d.suppressive {
            counters.suppressive_targets += 1;
        }
        apply_decision(&mut combatants, &config, *id, d);
        let contact = links.sample(combatants.position[id.index()], Channel::Contact);
        combatants.decision_timer[id.index()] = next_interval(&config, contact);
    }
}
