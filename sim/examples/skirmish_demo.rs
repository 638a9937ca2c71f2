//! Two platoons meet across a village wall.
//!
//! Run with: cargo run --example skirmish_demo
//! Stage timings: cargo run --release --example skirmish_demo --features profile
//! Verbose logs: RUST_LOG=tac_sim=debug cargo run --example skirmish_demo

use glam::{Vec2, Vec3};
use std::sync::Arc;
use tac_sim::{
    CombatState, Formation, GridField, Material, Order, OrderKind, PayloadKind, PointFlow, Role,
    SimWorld, SpawnParams, Team, VoxelTerrain,
};

const TICKS: u32 = 600;

fn village() -> VoxelTerrain {
    let mut terrain = VoxelTerrain::flat(160, 160, 1.0, 0);
    terrain.add_wall(Vec2::new(0.0, -20.0), Vec2::new(0.0, -4.0), 2, Material::Brick);
    terrain.add_wall(Vec2::new(0.0, 4.0), Vec2::new(0.0, 20.0), 1, Material::Wood);
    terrain.add_block(Vec2::new(15.0, -30.0), Vec2::new(22.0, -24.0), 4, Material::Concrete);
    terrain
}

fn platoon(sim: &mut SimWorld, team: Team, first_squad: u32, x: f32) {
    let roles = [
        Role::Rifleman,
        Role::Rifleman,
        Role::Gunner,
        Role::Marksman,
        Role::Grenadier,
        Role::Medic,
    ];
    for s in 0..3 {
        let squad = first_squad + s;
        let z = (s as f32 - 1.0) * 18.0;
        for (k, &role) in roles.iter().enumerate() {
            let at = Vec3::new(x, 0.0, z + k as f32 * 2.0 - 5.0);
            if let Err(err) = sim.spawn(SpawnParams::new(team, role, squad, at)) {
                tracing::warn!(%err, "spawn refused");
            }
        }
    }
    if team == Team::Red {
        let mortar = SpawnParams::new(team, Role::Mortar, first_squad, Vec3::new(x + 15.0, 0.0, 0.0));
        if let Err(err) = sim.spawn(mortar) {
            tracing::warn!(%err, "spawn refused");
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut sim = SimWorld::new(64, 2024);
    sim.set_terrain(Arc::new(village()));
    sim.set_cover(Arc::new(village()));
    sim.set_stigmergy(Arc::new(GridField::new(2.0)));
    sim.set_flow(Arc::new(PointFlow { goal: Vec2::new(40.0, 0.0) }));

    platoon(&mut sim, Team::Blue, 0, -45.0);
    platoon(&mut sim, Team::Red, 10, 45.0);
    tracing::info!(combatants = sim.len(), "platoons deployed");

    for squad in 0..3 {
        sim.set_squad_formation(squad, Formation::Wedge, 3.0);
        sim.set_squad_advance(squad, Vec2::X, 4.0);
        sim.set_squad_order(squad, Order::new(OrderKind::AttackMove, Vec3::new(30.0, 0.0, 0.0), None));
    }
    for squad in 10..13 {
        sim.set_squad_order(squad, Order::new(OrderKind::Defend, Vec3::new(35.0, 0.0, 0.0), None));
    }

    // Blue grenadiers open with smoke.
    let grenadiers: Vec<_> = (0..sim.len())
        .map(|i| tac_sim::EntityId(i as u32))
        .filter(|&id| sim.export_record(id).is_some_and(|r| r.role == Role::Grenadier && r.team == Team::Blue))
        .collect();
    for id in grenadiers {
        sim.set_payload(id, PayloadKind::Smoke);
    }

    let frame = 1.0 / 60.0;
    let mut ran = 0;
    let mut next_report = 150;
    while ran < TICKS {
        ran += sim.step(frame);
        if ran >= next_report {
            report(&sim);
            next_report += 150;
        }
    }

    sim.detonate(Vec3::new(35.0, 0.0, 0.0), PayloadKind::Explosive);
    sim.tick(sim.config().fixed_timestep);
    report(&sim);

    let totals = sim.totals();
    println!("\n=== Totals after {} ticks ===", sim.current_tick());
    println!(
        "shots {}  hits {}  near misses {}  deflections {}  wall stops {}  explosions {}  deaths {}",
        totals.shots_fired,
        totals.hits,
        totals.near_misses,
        totals.deflections,
        totals.wall_blocks,
        totals.explosions,
        totals.deaths
    );

    #[cfg(feature = "profile")]
    println!("\n{}", sim.profiler());

    match sim.snapshot().to_json_pretty() {
        Ok(json) => println!("\nsnapshot: {} bytes of JSON", json.len()),
        Err(err) => tracing::error!(%err, "snapshot failed"),
    }
}

fn report(sim: &SimWorld) {
    let snap = sim.snapshot();
    println!("--- tick {} (t={:.1}s) ---", snap.tick, snap.time);
    for team in Team::ALL {
        let side: Vec<_> = snap.combatants.iter().filter(|c| c.team == team).collect();
        let alive = side.iter().filter(|c| c.state != CombatState::Dead).count();
        let engaging = side.iter().filter(|c| c.state == CombatState::Engaging).count();
        let morale = side.iter().map(|c| c.morale).sum::<f32>() / side.len().max(1) as f32;
        println!(
            "  {:?}: alive {:>2}  engaging {:>2}  avg morale {:.2}",
            team, alive, engaging, morale
        );
    }
    println!(
        "  rounds in flight {}  hazard clouds {}",
        snap.projectiles.len(),
        snap.hazards.len()
    );
}
