//! Runtime shell for the pond installation: assembles the world, polls a
//! detection source, and streams composited frames to the LED controller at
//! a fixed cadence. The simulation never waits on the serial link; a dead
//! link only means frames stop leaving the box.

use anyhow::Result;
use pondglow_core::{
    CueSink, Detection, DetectionSource, PixelLayout, PondConfig, PondWorld, Vec2, presets,
};
use pondglow_transport::{ColorOrder, SerialTransport};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use std::f64::consts::TAU;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Logical pixels on the installed strip (3 physical LEDs each).
const PIXEL_COUNT: usize = 300;
/// Strip radius relative to the pond radius.
const STRIP_RADIUS_FACTOR: f64 = 0.9;
/// Must match the firmware flashed on the LED controller.
const SERIAL_BAUD: u32 = 921_600;
/// Ticks between status log lines.
const SUMMARY_INTERVAL: u64 = 600;

fn main() -> Result<()> {
    init_tracing();

    let config = PondConfig::default();
    let tick_rate = config.tick_rate;
    let pond_radius = match config.boundary {
        pondglow_core::WorldBoundary::Circle { radius } => radius,
        pondglow_core::WorldBoundary::Ellipse { semi_x, semi_y } => semi_x.min(semi_y),
    };
    let layout = ring_layout(PIXEL_COUNT, pond_radius * STRIP_RADIUS_FACTOR)?;

    let mut world = PondWorld::with_cue_sink(
        config,
        layout,
        presets::species_roster(),
        Box::new(LogCueSink),
    )?;
    info!(
        pixels = world.layout().len(),
        birds = world.birds().len(),
        "pond world ready"
    );

    let port = std::env::var("PONDGLOW_SERIAL_PORT").unwrap_or_else(|_| "/dev/ttyUSB0".to_string());
    let order = color_order_from_env();
    info!(port = %port, baud = SERIAL_BAUD, ?order, "starting serial transport");
    let transport = SerialTransport::serial(port, SERIAL_BAUD, order);

    let mut source = SyntheticVisitor::new(pond_radius, 0x5EED);
    run(&mut world, &mut source, &transport, tick_rate);
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn color_order_from_env() -> ColorOrder {
    match std::env::var("PONDGLOW_COLOR_ORDER").as_deref() {
        Ok("grb") | Ok("GRB") => ColorOrder::Grb,
        Ok("brg") | Ok("BRG") => ColorOrder::Brg,
        Ok(other) if !other.eq_ignore_ascii_case("rgb") => {
            warn!(value = other, "unknown color order, using RGB");
            ColorOrder::Rgb
        }
        _ => ColorOrder::Rgb,
    }
}

/// Evenly spaced ring of logical pixels around the pond center.
///
/// Stands in for the calibrated layout the path-generation tooling produces
/// for the real pond; both yield the same ordered position list.
fn ring_layout(pixel_count: usize, radius: f64) -> Result<PixelLayout> {
    let positions = (0..pixel_count)
        .map(|index| {
            let angle = TAU * index as f64 / pixel_count as f64;
            Vec2::new(radius * angle.cos(), radius * angle.sin())
        })
        .collect();
    Ok(PixelLayout::new(positions)?)
}

fn run(
    world: &mut PondWorld,
    source: &mut dyn DetectionSource,
    transport: &SerialTransport,
    tick_rate: f64,
) -> ! {
    let period = Duration::from_secs_f64(1.0 / tick_rate);
    let mut next_deadline = Instant::now() + period;
    let mut link_was_up = transport.is_running();

    info!("starting real-time simulation and LED output");
    loop {
        let detections = source.poll();
        let summary = world.step(&detections);
        transport.send(world.frame());

        let link_up = transport.is_running();
        if link_was_up && !link_up {
            warn!("serial link lost; simulation continues, frames are dropped");
        }
        link_was_up = link_up;

        if summary.tick.0.is_multiple_of(SUMMARY_INTERVAL) {
            info!(
                tick = summary.tick.0,
                tracks = summary.track_count,
                chirping = summary.chirping,
                fleeing = summary.fleeing,
                link = link_up,
                "tick summary"
            );
        }

        let now = Instant::now();
        if next_deadline > now {
            std::thread::sleep(next_deadline - now);
        } else {
            // fell behind; rebase rather than trying to catch up in a burst
            next_deadline = now;
        }
        next_deadline += period;
    }
}

/// Audio cue sink that records chirp playback requests in the log.
///
/// The real installation hands these keys to an external sampler process;
/// either way a failed cue never reaches the simulation.
struct LogCueSink;

impl CueSink for LogCueSink {
    fn play(&mut self, species: &str, key: &str) {
        info!(species, key, "chirp cue");
    }
}

/// Phase of the synthetic visitor's stroll around the pond.
enum VisitorPhase {
    /// Nobody near the pond.
    Away(u32),
    /// Walking along the edge.
    Strolling(u32),
    /// Standing still, watching; lets curiosity build.
    Standing(u32),
}

/// Deterministic stand-in for the real presence sensor: one visitor who
/// strolls the pond edge, stops to watch, and sometimes wanders off.
struct SyntheticVisitor {
    rng: SmallRng,
    angle: f64,
    orbit_radius: f64,
    phase: VisitorPhase,
}

impl SyntheticVisitor {
    fn new(pond_radius: f64, seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            angle: 0.0,
            orbit_radius: pond_radius * 0.6,
            phase: VisitorPhase::Strolling(600),
        }
    }

    fn next_phase(&mut self) -> VisitorPhase {
        let roll: f64 = self.rng.random();
        if roll < 0.2 {
            VisitorPhase::Away(self.rng.random_range(300..900))
        } else if roll < 0.6 {
            VisitorPhase::Standing(self.rng.random_range(240..720))
        } else {
            VisitorPhase::Strolling(self.rng.random_range(300..1200))
        }
    }
}

impl DetectionSource for SyntheticVisitor {
    fn poll(&mut self) -> Vec<Detection> {
        let remaining = match &mut self.phase {
            VisitorPhase::Away(ticks)
            | VisitorPhase::Strolling(ticks)
            | VisitorPhase::Standing(ticks) => {
                *ticks = ticks.saturating_sub(1);
                *ticks
            }
        };
        if remaining == 0 {
            self.phase = self.next_phase();
        }

        match self.phase {
            VisitorPhase::Away(_) => Vec::new(),
            VisitorPhase::Strolling(_) => {
                self.angle = (self.angle + TAU / 3600.0) % TAU;
                vec![Detection::new(
                    self.orbit_radius * self.angle.cos(),
                    self.orbit_radius * self.angle.sin(),
                    1.0,
                )]
            }
            VisitorPhase::Standing(_) => vec![Detection::new(
                self.orbit_radius * self.angle.cos(),
                self.orbit_radius * self.angle.sin(),
                1.0,
            )],
        }
    }
}
