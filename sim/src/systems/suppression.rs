//! Suppression decay and the posture it forces.

use crate::components::*;
use crate::config::SimConfig;
use crate::entity::Combatants;
use crate::systems::time::DeltaTime;
use bevy_ecs::prelude::*;

/// Suppression at or above this level counts as suppressed.
pub const SUPPRESSED: f32 = 0.3;
/// Suppression at or above this level pins a combatant.
pub const PINNED: f32 = 0.7;

#[inline]
pub fn is_suppressed(value: f32) -> bool {
    value >= SUPPRESSED
}

#[inline]
pub fn is_pinned(value: f32) -> bool {
    value >= PINNED
}

/// Add suppression to one slot, clamped to 1.
#[inline]
pub fn add_suppression(combatants: &mut Combatants, i: usize, amount: f32) {
    let s = &mut combatants.suppression[i];
    *s = (*s + amount.max(0.0)).min(1.0);
}

/// Linear decay at the configured rate.
pub fn suppression_decay_system(
    dt: Res<DeltaTime>,
    config: Res<SimConfig>,
    mut combatants: ResMut<Combatants>,
) {
    let decay = config.suppression_decay * dt.0;
    let ids: Vec<usize> = combatants.alive_ids().map(|id| id.index()).collect();
    for i in ids {
        let s = &mut combatants.suppression[i];
        *s = (*s - decay).max(0.0);
    }
}

/// Posture the situation calls for, before any timed transition.
pub fn desired_posture(
    state: CombatState,
    mode: MovementMode,
    suppression: f32,
    chosen: Posture,
) -> Posture {
    match state {
        CombatState::Downed | CombatState::Frozen => Posture::Prone,
        CombatState::Berserk | CombatState::Climbing | CombatState::Falling => Posture::Stand,
        _ if is_pinned(suppression) => Posture::Prone,
        _ if matches!(mode, MovementMode::Run | MovementMode::Charge) => Posture::Stand,
        CombatState::InCover if chosen == Posture::Stand => Posture::Crouch,
        _ if is_suppressed(suppression) && chosen == Posture::Stand => Posture::Crouch,
        _ => chosen,
    }
}

/// Moves each combatant's posture toward its target after a transition delay.
pub fn posture_system(
    dt: Res<DeltaTime>,
    config: Res<SimConfig>,
    mut combatants: ResMut<Combatants>,
) {
    let ids: Vec<usize> = combatants.alive_ids().map(|id| id.index()).collect();
    for i in ids {
        let target = desired_posture(
            combatants.state[i],
            combatants.mode[i],
            combatants.suppression[i],
            combatants.posture_target[i],
        );
        if combatants.posture[i] == target {
            combatants.posture_timer[i] = 0.0;
            continue;
        }
        // Climbing snaps upright; everything else takes the transition time.
        if combatants.state[i].is_traversal() {
            combatants.posture[i] = target;
            combatants.posture_timer[i] = 0.0;
            continue;
        }
        combatants.posture_timer[i] += dt.0;
        if combatants.posture_timer[i] >= config.posture_transition_time {
            combatants.posture[i] = target;
            combatants.posture_timer[i] = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::SpawnParams;
    use glam::Vec3;

    fn world_with_one() -> World {
        let mut world = World::new();
        world.insert_resource(DeltaTime(1.0));
        world.insert_resource(SimConfig::default());
        let mut c = Combatants::with_capacity(2);
        c.spawn(SpawnParams::new(Team::Blue, Role::Rifleman, 0, Vec3::ZERO), 0)
            .unwrap();
        world.insert_resource(c);
        world
    }

    #[test]
    fn test_suppression_decays() {
        let mut world = world_with_one();
        world.resource_mut::<Combatants>().suppression[0] = 1.0;

        let mut schedule = Schedule::default();
        schedule.add_systems(suppression_decay_system);
        schedule.run(&mut world);

        let value = world.resource::<Combatants>().suppression[0];
        let rate = SimConfig::default().suppression_decay;
        assert!((value - (1.0 - rate)).abs() < 0.001);

        for _ in 0..20 {
            schedule.run(&mut world);
        }
        assert_eq!(world.resource::<Combatants>().suppression[0], 0.0);
    }

    #[test]
    fn test_pinned_goes_prone_after_transition() {
        let mut world = world_with_one();
        world.resource_mut::<DeltaTime>().0 = 0.25;
        world.resource_mut::<Combatants>().suppression[0] = 0.9;

        let mut schedule = Schedule::default();
        schedule.add_systems(posture_system);
        schedule.run(&mut world);
        assert_eq!(world.resource::<Combatants>().posture[0], Posture::Stand);
        for _ in 0..3 {
            schedule.run(&mut world);
        }
        assert_eq!(world.resource::<Combatants>().posture[0], Posture::Prone);
    }

    #[test]
    fn test_cover_crouches_and_running_stands() {
        assert_eq!(
            desired_posture(CombatState::InCover, MovementMode::Walk, 0.0, Posture::Stand),
            Posture::Crouch
        );
        assert_eq!(
            desired_posture(CombatState::Moving, MovementMode::Run, 0.4, Posture::Crouch),
            Posture::Stand
        );
        assert_eq!(
            desired_posture(CombatState::Downed, MovementMode::Charge, 0.0, Posture::Stand),
            Posture::Prone
        );
    }
}
