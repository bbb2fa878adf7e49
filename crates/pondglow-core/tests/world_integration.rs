use pondglow_core::{
    BirdState, Detection, PixelLayout, PondConfig, PondWorld, Vec2, WorldBoundary, presets,
};
use std::f64::consts::TAU;

fn ring_layout(pixel_count: usize, radius: f64) -> PixelLayout {
    let positions = (0..pixel_count)
        .map(|index| {
            let angle = TAU * index as f64 / pixel_count as f64;
            Vec2::new(radius * angle.cos(), radius * angle.sin())
        })
        .collect();
    PixelLayout::new(positions).expect("ring layout")
}

/// A visitor strolling the pond edge, standing still now and then.
fn scripted_detections(tick: u64) -> Vec<Detection> {
    if tick % 200 < 30 {
        return Vec::new(); // occasionally nobody is around
    }
    let pause = tick % 150 >= 100; // long pauses so curiosity can trigger
    let phase = if pause { 100 } else { tick % 150 };
    let angle = TAU * phase as f64 / 600.0;
    Vec::from([Detection::new(2.5 * angle.cos(), 2.5 * angle.sin(), 1.0)])
}

#[test]
fn seeded_world_advances_deterministically() {
    let config = PondConfig {
        rng_seed: Some(0xDEADBEEF),
        ..PondConfig::default()
    };
    let layout = ring_layout(100, 3.5);
    let mut world_a =
        PondWorld::new(config.clone(), layout.clone(), presets::species_roster()).expect("world_a");
    let mut world_b =
        PondWorld::new(config, layout, presets::species_roster()).expect("world_b");

    for tick in 0..240 {
        let detections = scripted_detections(tick);
        let summary_a = world_a.step(&detections);
        let summary_b = world_b.step(&detections);
        assert_eq!(summary_a, summary_b);
        assert_eq!(world_a.frame(), world_b.frame());
    }

    for (bird_a, bird_b) in world_a.birds().iter().zip(world_b.birds()) {
        assert_eq!(bird_a.position, bird_b.position);
        assert_eq!(bird_a.state, bird_b.state);
    }
}

#[test]
fn chirping_birds_hold_position_for_the_full_burst() {
    let config = PondConfig {
        rng_seed: Some(21),
        chirp_probability: 1.0,
        ..PondConfig::default()
    };
    let roster = vec![presets::species_roster().remove(0)];
    let mut world = PondWorld::new(config, ring_layout(100, 3.5), roster).expect("world");

    world.step(&[]);
    assert_eq!(world.birds()[0].state, BirdState::Chirping);
    world.config_mut().chirp_probability = 0.0;
    let anchor = world.birds()[0].position;

    let mut burst_ticks = 0;
    while world.birds()[0].state == BirdState::Chirping {
        world.step(&[]);
        assert_eq!(
            world.birds()[0].position, anchor,
            "a chirping bird must not translate"
        );
        burst_ticks += 1;
        assert!(burst_ticks < 1_000, "burst failed to terminate");
    }
    assert!(burst_ticks > 0);
}

#[test]
fn birds_never_escape_the_boundary() {
    for boundary in [
        WorldBoundary::Circle { radius: 4.0 },
        WorldBoundary::Ellipse {
            semi_x: 5.0,
            semi_y: 2.5,
        },
    ] {
        let config = PondConfig {
            boundary,
            rng_seed: Some(99),
            ..PondConfig::default()
        };
        let mut world =
            PondWorld::new(config, ring_layout(100, 2.0), presets::species_roster())
                .expect("world");

        for tick in 0..600 {
            world.step(&scripted_detections(tick));
            for bird in world.birds() {
                let reach = boundary.normalized_distance(bird.position);
                assert!(
                    reach <= 1.0 + 1e-9,
                    "bird {} left the pond (reach={reach})",
                    bird.personality.species
                );
            }
        }
    }
}

#[test]
fn frames_cover_every_pixel_and_only_those() {
    let config = PondConfig {
        rng_seed: Some(3),
        ..PondConfig::default()
    };
    let mut world =
        PondWorld::new(config, ring_layout(300, 3.5), presets::species_roster()).expect("world");

    world.step(&[]);
    assert_eq!(world.frame().len(), world.layout().len());

    // with eight dim birds most of a 300-pixel ring stays dark
    let lit = world
        .frame()
        .iter()
        .filter(|pixel| **pixel != [0, 0, 0])
        .count();
    assert!(lit > 0, "the cast should light something");
    assert!(lit < 150, "resting birds light a minority of the ring");
}

#[test]
fn long_run_keeps_history_bounded_and_ticks_monotonic() {
    let config = PondConfig {
        rng_seed: Some(1234),
        history_capacity: 64,
        ..PondConfig::default()
    };
    let mut world =
        PondWorld::new(config, ring_layout(100, 3.5), presets::species_roster()).expect("world");

    for tick in 0..500 {
        let summary = world.step(&scripted_detections(tick));
        assert_eq!(summary.tick.0, tick + 1);
        assert!(summary.track_count <= 1);
    }
    let summaries: Vec<_> = world.history().copied().collect();
    assert_eq!(summaries.len(), 64);
    assert!(
        summaries.windows(2).all(|pair| pair[0].tick.0 + 1 == pair[1].tick.0),
        "history must be contiguous"
    );
}
