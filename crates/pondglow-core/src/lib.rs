//! Core simulation for the pondglow LED installation.
//!
//! A fixed cast of bird agents wanders a simulated pond ringed by an
//! addressable LED strip. Each tick the world ingests raw human detections,
//! refreshes persistent tracks, advances every bird's behavioral state
//! machine, applies shared motion rules, and composites one RGB value per
//! logical pixel. The composited frame is handed to a transport for
//! delivery to the microcontroller driving the strip.

use ordered_float::OrderedFloat;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::f64::consts::TAU;
use std::fmt;
use thiserror::Error;

pub mod presets;

/// Exponential smoothing factor retained from the previous track velocity.
const VELOCITY_SMOOTHING: f64 = 0.9;
/// Velocity decay applied per tick while idling.
const IDLE_VELOCITY_DECAY: f64 = 0.8;
/// Velocity decay applied per tick while foraging (between impulses).
const FORAGE_VELOCITY_DECAY: f64 = 0.7;
/// Velocity decay applied per tick while cautious.
const CAUTION_VELOCITY_DECAY: f64 = 0.8;
/// Per-tick chance of a random foraging impulse.
const FORAGE_IMPULSE_PROBABILITY: f64 = 0.1;
/// Share of idle-timer expiries that branch into foraging (the rest explore).
const FORAGE_BRANCH_PROBABILITY: f64 = 0.7;
/// Speed multiplier while fleeing.
const FLEE_SPEED_FACTOR: f64 = 2.0;
/// A fleeing bird calms down to caution beyond this multiple of its flee distance.
const FLEE_EXIT_FACTOR: f64 = 1.5;
/// A cautious bird relaxes to idle beyond this multiple of its caution distance.
const CAUTION_EXIT_FACTOR: f64 = 1.2;
/// Normalized boundary distance at which soft repulsion starts.
const SOFT_BOUNDARY_START: f64 = 0.8;
/// Fraction of velocity retained (and inverted) on hard boundary impact.
const BOUNDARY_RESTITUTION: f64 = 0.5;

/// Chirp pattern key used by percussive species.
pub const DRUMMING_CHIRP_KEY: &str = "drumming";
/// Chirp pattern key used by everyone else.
pub const DEFAULT_CHIRP_KEY: &str = "default";

/// Errors emitted while constructing or validating world state.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// 2D vector in model space (meters, centered on the pond).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Construct a new vector.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self - other).length()
    }

    /// Squared distance, for cheap comparisons.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Unit vector in the same direction, or zero when the length vanishes.
    #[must_use]
    pub fn normalized(self) -> Self {
        let len = self.length();
        if len <= f64::EPSILON {
            Self::ZERO
        } else {
            Self::new(self.x / len, self.y / len)
        }
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f64> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// Static mapping from logical pixel index to a model-space position.
///
/// The physical strip groups 3 LEDs into one addressable pixel; the loader
/// that averages LED coordinates into pixel coordinates runs outside this
/// crate. Positions are fixed for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelLayout {
    positions: Vec<Vec2>,
}

impl PixelLayout {
    /// Build a layout from ordered pixel positions. Rejects an empty list.
    pub fn new(positions: Vec<Vec2>) -> Result<Self, WorldError> {
        if positions.is_empty() {
            return Err(WorldError::InvalidConfig(
                "pixel layout must contain at least one pixel",
            ));
        }
        Ok(Self { positions })
    }

    /// Number of logical pixels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true when the layout holds no pixels (never, post-construction).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Model-space position of the pixel at `index`.
    #[must_use]
    pub fn position(&self, index: usize) -> Option<Vec2> {
        self.positions.get(index).copied()
    }

    /// All pixel positions, in index order.
    #[must_use]
    pub fn positions(&self) -> &[Vec2] {
        &self.positions
    }

    /// Index of the pixel closest to `position`.
    #[must_use]
    pub fn nearest_pixel(&self, position: Vec2) -> usize {
        self.positions
            .iter()
            .enumerate()
            .min_by_key(|(_, pixel)| OrderedFloat(pixel.distance_squared(position)))
            .map(|(index, _)| index)
            .unwrap_or(0)
    }
}

/// One raw detection for the current tick, in model space.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub position: Vec2,
    pub size: f64,
}

impl Detection {
    /// Construct a detection from raw coordinates.
    #[must_use]
    pub const fn new(x: f64, y: f64, size: f64) -> Self {
        Self {
            position: Vec2::new(x, y),
            size,
        }
    }
}

/// Pull-based source of raw detections, polled once per tick.
///
/// Implementations may be user-input-derived, network-derived, or synthetic;
/// the tracker does not care.
pub trait DetectionSource {
    /// Returns zero or more detections for the current tick.
    fn poll(&mut self) -> Vec<Detection>;
}

/// A persistent, velocity-smoothed record of one detected human.
///
/// Tracks live exactly as long as they are matched: any track not claimed by
/// a detection this tick is dropped, with no occlusion memory. Ids are
/// monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub id: u64,
    pub position: Vec2,
    /// Exponentially smoothed velocity in model units per second.
    pub velocity: Vec2,
    pub size: f64,
    /// Size delta against the previous matched observation.
    pub size_change: f64,
    /// Consecutive ticks this track has been effectively stationary.
    pub still_ticks: u32,
}

impl Track {
    /// Smoothed speed in model units per second.
    #[must_use]
    pub fn speed(&self) -> f64 {
        self.velocity.length()
    }
}

/// Converts per-frame raw detections into a stable set of [`Track`]s.
///
/// Association is greedy nearest-neighbor in detection iteration order:
/// deterministic, not globally optimal. Two detections contending for the
/// same previous track are resolved by whichever is processed first. That
/// behavior is intentional and load-bearing for downstream tuning; do not
/// replace it with an optimal assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectTracker {
    tracks: Vec<Track>,
    next_id: u64,
    tick_rate: f64,
    match_gate: f64,
    still_speed_epsilon: f64,
}

impl ObjectTracker {
    /// Create a tracker. `match_gate` is the association distance in model
    /// units; `still_speed_epsilon` is the speed below which a track counts
    /// as stationary.
    #[must_use]
    pub fn new(tick_rate: f64, match_gate: f64, still_speed_epsilon: f64) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 0,
            tick_rate,
            match_gate,
            still_speed_epsilon,
        }
    }

    /// Ingest this tick's detections, updating matched tracks, spawning
    /// tracks for unmatched detections, and dropping everything unclaimed.
    pub fn update(&mut self, detections: &[Detection]) {
        let previous = std::mem::take(&mut self.tracks);
        let mut claimed = vec![false; previous.len()];
        let mut current = Vec::with_capacity(detections.len());

        for detection in detections {
            let nearest = previous
                .iter()
                .enumerate()
                .filter(|(index, _)| !claimed[*index])
                .min_by_key(|(_, track)| {
                    OrderedFloat(track.position.distance(detection.position))
                });

            match nearest {
                Some((index, track))
                    if track.position.distance(detection.position) < self.match_gate =>
                {
                    claimed[index] = true;
                    current.push(self.advance_track(track, detection));
                }
                _ => current.push(self.spawn_track(detection)),
            }
        }

        self.tracks = current;
    }

    /// Current track set (may be empty).
    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    fn advance_track(&self, track: &Track, detection: &Detection) -> Track {
        let raw_velocity = (detection.position - track.position) * self.tick_rate;
        let velocity =
            track.velocity * VELOCITY_SMOOTHING + raw_velocity * (1.0 - VELOCITY_SMOOTHING);
        let still_ticks = if velocity.length() < self.still_speed_epsilon {
            track.still_ticks.saturating_add(1)
        } else {
            0
        };
        Track {
            id: track.id,
            position: detection.position,
            velocity,
            size: detection.size,
            size_change: detection.size - track.size,
            still_ticks,
        }
    }

    fn spawn_track(&mut self, detection: &Detection) -> Track {
        let id = self.next_id;
        self.next_id += 1;
        Track {
            id,
            position: detection.position,
            velocity: Vec2::ZERO,
            size: detection.size,
            size_change: 0.0,
            still_ticks: 0,
        }
    }
}

/// Which of the two personality colors a pattern segment renders.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ColorRole {
    Base,
    Accent,
}

/// One run of consecutive pixels in a color pattern.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternSegment {
    pub role: ColorRole,
    pub span: u32,
}

impl PatternSegment {
    #[must_use]
    pub const fn new(role: ColorRole, span: u32) -> Self {
        Self { role, span }
    }
}

/// Total pixel span covered by a pattern.
#[must_use]
pub fn pattern_span(segments: &[PatternSegment]) -> u32 {
    segments.iter().map(|segment| segment.span).sum()
}

/// Resolve which color role covers `offset` pixels from the pattern center.
///
/// Segments are laid out left to right, centered on offset zero; anything
/// outside the pattern (or an empty pattern) renders the base color.
#[must_use]
pub fn role_at_offset(segments: &[PatternSegment], offset: i64) -> ColorRole {
    let total: i64 = segments.iter().map(|segment| i64::from(segment.span)).sum();
    if total == 0 {
        return ColorRole::Base;
    }
    let mut cursor = -total.div_euclid(2);
    for segment in segments {
        let end = cursor + i64::from(segment.span);
        if (cursor..end).contains(&offset) {
            return segment.role;
        }
        cursor = end;
    }
    ColorRole::Base
}

/// One `(time, brightness)` point of a chirp light burst.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ChirpKeyframe {
    /// Seconds from chirp start.
    pub time: f64,
    pub brightness: f64,
}

impl ChirpKeyframe {
    #[must_use]
    pub const fn new(time: f64, brightness: f64) -> Self {
        Self { time, brightness }
    }
}

/// Linear interpolation between the keyframes bracketing `clock`.
///
/// Outside every bracketing pair (before the first keyframe, past the last,
/// or with fewer than two keyframes) the brightness is zero.
#[must_use]
pub fn sample_chirp(frames: &[ChirpKeyframe], clock: f64) -> f64 {
    for pair in frames.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        if clock >= start.time && clock < end.time {
            let span = end.time - start.time;
            if span <= f64::EPSILON {
                return end.brightness;
            }
            let progress = (clock - start.time) / span;
            return start.brightness + (end.brightness - start.brightness) * progress;
        }
    }
    0.0
}

/// Static traits of one bird species.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BirdPersonality {
    /// Stable species key, also used when firing audio cues.
    pub species: String,
    pub base_color: [u8; 3],
    pub accent_color: [u8; 3],
    /// Fallback lit span (pixels) when a pattern is empty.
    pub base_pixel_count: u32,
    /// Relative body size; scales how far chirp bursts grow.
    pub size: f64,
    /// Territorial spacing threshold, in pixel indices along the strip.
    pub pixel_personal_space: u32,
    pub color_pattern: Vec<PatternSegment>,
    pub chirp_color_pattern: Vec<PatternSegment>,
    /// Cruising speed in model units per second.
    pub movement_speed: f64,
    /// Approach speed while curious, model units per second.
    pub approach_speed: f64,
    /// Weight applied to the curiosity draw; 0 disables curiosity entirely.
    pub curiosity: f64,
    pub caution_distance: f64,
    pub flee_distance: f64,
    /// Percussive species chirp with the drumming pattern key.
    pub percussive: bool,
    pub chirp_keyframes: BTreeMap<String, Vec<ChirpKeyframe>>,
}

/// Behavioral state of a bird, advanced once per tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum BirdState {
    #[default]
    Idle,
    Foraging,
    Exploring,
    Curious,
    Fleeing,
    Caution,
    Chirping,
}

impl BirdState {
    /// Fixed display brightness while resting in this state.
    ///
    /// Chirping brightness comes from the active keyframe playback instead.
    #[must_use]
    pub const fn resting_brightness(self) -> f64 {
        match self {
            Self::Idle => 0.3,
            Self::Foraging => 0.4,
            Self::Curious => 0.5,
            Self::Exploring => 0.6,
            Self::Caution => 0.7,
            Self::Fleeing => 1.0,
            Self::Chirping => 0.0,
        }
    }
}

/// Fire-and-forget sink for audio cues triggered by chirping birds.
///
/// Implementations own their failure handling; a cue that cannot play must
/// be logged (or ignored) by the sink, never surfaced to the simulation.
pub trait CueSink: Send {
    /// Request playback of the cue `key` for `species`.
    fn play(&mut self, species: &str, key: &str);
}

/// Default sink that drops every cue.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCueSink;

impl CueSink for NullCueSink {
    fn play(&mut self, _species: &str, _key: &str) {}
}

/// Pixel-index view of a peer bird, used for territorial spacing.
#[derive(Debug, Clone, Copy)]
struct PeerPixel {
    center: usize,
    position: Vec2,
}

/// One simulated bird: personality plus mutable per-tick state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BirdAgent {
    pub personality: BirdPersonality,
    pub position: Vec2,
    /// Per-tick displacement intent; integrated by the physics pass.
    pub velocity: Vec2,
    pub state: BirdState,
    /// Frames remaining in the current action.
    pub action_timer: i32,
    /// Destination while exploring.
    pub target: Vec2,
    /// Seconds into the active chirp playback.
    pub chirp_clock: f64,
    /// Interpolated brightness of the active chirp, zero otherwise.
    pub chirp_brightness: f64,
    pub active_chirp_key: Option<String>,
}

impl BirdAgent {
    /// Place a bird at `position` with a freshly randomized idle timer.
    #[must_use]
    pub fn spawn(
        personality: BirdPersonality,
        position: Vec2,
        rng: &mut SmallRng,
        idle_duration_range: (u32, u32),
    ) -> Self {
        Self {
            personality,
            position,
            velocity: Vec2::ZERO,
            state: BirdState::Idle,
            action_timer: random_duration(rng, idle_duration_range),
            target: position,
            chirp_clock: 0.0,
            chirp_brightness: 0.0,
            active_chirp_key: None,
        }
    }

    /// Color pattern active for the current state.
    #[must_use]
    pub fn active_pattern(&self) -> &[PatternSegment] {
        if self.state == BirdState::Chirping {
            &self.personality.chirp_color_pattern
        } else {
            &self.personality.color_pattern
        }
    }

    /// Rendered half-width (pixels) and brightness for the current state.
    ///
    /// Chirp bursts grow with intensity: the half-width scales by
    /// `1 + brightness * size * chirp_spread_gain`.
    #[must_use]
    pub fn light_extent(&self, chirp_spread_gain: f64) -> (u32, f64) {
        let span = pattern_span(self.active_pattern());
        let base_spread = if span > 0 {
            span / 2
        } else {
            self.personality.base_pixel_count / 2
        };
        if self.state == BirdState::Chirping {
            let brightness = self.chirp_brightness;
            let grown = f64::from(base_spread)
                * (1.0 + brightness * self.personality.size * chirp_spread_gain);
            (grown.round() as u32, brightness)
        } else {
            (base_spread, self.state.resting_brightness())
        }
    }

    fn behave(
        &mut self,
        tracks: &[Track],
        my_center: usize,
        peers: &[PeerPixel],
        tuning: &PondConfig,
        rng: &mut SmallRng,
        cues: &mut dyn CueSink,
    ) {
        let dt = 1.0 / tuning.tick_rate;
        self.apply_spacing(my_center, peers, tuning.spacing_gain);

        let nearest = nearest_track(tracks, self.position);

        // Threat assessment pre-empts everything except an active chirp or flight.
        if !matches!(self.state, BirdState::Chirping | BirdState::Fleeing)
            && let Some((track, distance)) = nearest
        {
            if distance < self.personality.flee_distance {
                self.state = BirdState::Fleeing;
            } else if distance < self.personality.caution_distance {
                self.state = BirdState::Caution;
            } else if track.still_ticks >= tuning.curious_still_ticks
                && rng.random::<f64>()
                    < self.personality.curiosity * tuning.curious_check_probability
            {
                self.state = BirdState::Curious;
            }
        }

        self.action_timer -= 1;
        let step = self.personality.movement_speed * dt;

        match self.state {
            BirdState::Idle => {
                self.velocity = self.velocity * IDLE_VELOCITY_DECAY;
                if self.action_timer <= 0 {
                    if rng.random::<f64>() < FORAGE_BRANCH_PROBABILITY {
                        self.state = BirdState::Foraging;
                        self.action_timer = random_duration(rng, tuning.forage_duration_range);
                    } else {
                        self.state = BirdState::Exploring;
                        self.action_timer = random_duration(rng, tuning.idle_duration_range);
                        let heading = rng.random_range(0.0..TAU);
                        let reach = rng.random_range(
                            tuning.explore_distance_range.0..tuning.explore_distance_range.1,
                        );
                        self.target =
                            self.position + Vec2::new(heading.cos(), heading.sin()) * reach;
                    }
                }
            }
            BirdState::Foraging => {
                if rng.random::<f64>() < FORAGE_IMPULSE_PROBABILITY {
                    let heading = rng.random_range(0.0..TAU);
                    self.velocity += Vec2::new(heading.cos(), heading.sin()) * step;
                } else {
                    self.velocity = self.velocity * FORAGE_VELOCITY_DECAY;
                }
                if self.action_timer <= 0 {
                    self.enter_idle(rng, tuning.idle_duration_range);
                }
            }
            BirdState::Exploring => {
                let to_target = self.target - self.position;
                if to_target.length() < tuning.explore_arrival_epsilon {
                    self.enter_idle(rng, tuning.idle_duration_range);
                } else {
                    self.velocity = to_target.normalized() * step;
                }
            }
            BirdState::Curious => match nearest {
                Some((track, distance)) => {
                    if track.speed() > tuning.still_speed_epsilon {
                        // The human moved; curiosity flips straight to caution.
                        self.state = BirdState::Caution;
                    } else if distance < tuning.curious_arrival_distance {
                        self.enter_idle(rng, tuning.idle_duration_range);
                    } else {
                        let approach = self.personality.approach_speed * dt;
                        self.velocity =
                            (track.position - self.position).normalized() * approach;
                    }
                }
                None => self.enter_idle(rng, tuning.idle_duration_range),
            },
            BirdState::Fleeing => match nearest {
                Some((track, distance)) => {
                    self.velocity = (self.position - track.position).normalized()
                        * (step * FLEE_SPEED_FACTOR);
                    if distance > self.personality.flee_distance * FLEE_EXIT_FACTOR {
                        self.state = BirdState::Caution;
                    }
                }
                None => self.state = BirdState::Caution,
            },
            BirdState::Caution => {
                self.velocity = self.velocity * CAUTION_VELOCITY_DECAY;
                let clear = nearest.is_none_or(|(_, distance)| {
                    distance > self.personality.caution_distance * CAUTION_EXIT_FACTOR
                });
                if clear {
                    // Stay on guard: the post-scare rest is half the usual length.
                    self.state = BirdState::Idle;
                    self.action_timer = random_duration(rng, tuning.idle_duration_range) / 2;
                }
            }
            BirdState::Chirping => {
                self.velocity = Vec2::ZERO;
                self.chirp_clock += dt;
                let playback = self
                    .active_chirp_key
                    .as_ref()
                    .and_then(|key| self.personality.chirp_keyframes.get(key))
                    .and_then(|frames| {
                        frames
                            .last()
                            .map(|last| (sample_chirp(frames, self.chirp_clock), last.time))
                    });
                match playback {
                    Some((brightness, end_time)) if self.chirp_clock <= end_time => {
                        self.chirp_brightness = brightness;
                    }
                    _ => {
                        self.chirp_brightness = 0.0;
                        self.active_chirp_key = None;
                        self.enter_idle(rng, tuning.idle_duration_range);
                    }
                }
            }
        }

        // Spontaneous bursts only interrupt the two relaxed states.
        if matches!(self.state, BirdState::Idle | BirdState::Foraging)
            && rng.random::<f64>() < tuning.chirp_probability
        {
            self.try_start_chirp(tuning.tick_rate, cues);
        }
    }

    fn apply_spacing(&mut self, my_center: usize, peers: &[PeerPixel], spacing_gain: f64) {
        let space = self.personality.pixel_personal_space;
        if space == 0 {
            return;
        }
        for peer in peers {
            let pixel_distance = my_center.abs_diff(peer.center);
            if pixel_distance as u64 >= u64::from(space) {
                continue;
            }
            let away = (self.position - peer.position).normalized();
            if away == Vec2::ZERO {
                continue;
            }
            let overlap = (f64::from(space) - pixel_distance as f64) / f64::from(space);
            self.velocity += away * (overlap * spacing_gain);
        }
    }

    fn enter_idle(&mut self, rng: &mut SmallRng, idle_duration_range: (u32, u32)) {
        self.state = BirdState::Idle;
        self.action_timer = random_duration(rng, idle_duration_range);
    }

    /// Attempt to begin a chirp. A missing or empty keyframe list for the
    /// selected key silently abandons the attempt; the agent keeps its state.
    fn try_start_chirp(&mut self, tick_rate: f64, cues: &mut dyn CueSink) {
        let key = if self.personality.percussive {
            DRUMMING_CHIRP_KEY
        } else {
            DEFAULT_CHIRP_KEY
        };
        let Some(frames) = self.personality.chirp_keyframes.get(key) else {
            return;
        };
        let Some(last) = frames.last() else {
            return;
        };
        if last.time <= 0.0 {
            return;
        }
        self.state = BirdState::Chirping;
        self.action_timer = (last.time * tick_rate) as i32;
        self.chirp_clock = 0.0;
        self.chirp_brightness = 0.0;
        self.active_chirp_key = Some(key.to_string());
        cues.play(&self.personality.species, key);
    }
}

fn nearest_track(tracks: &[Track], position: Vec2) -> Option<(&Track, f64)> {
    tracks
        .iter()
        .map(|track| (track, track.position.distance(position)))
        .min_by_key(|(_, distance)| OrderedFloat(*distance))
}

fn random_duration(rng: &mut SmallRng, range: (u32, u32)) -> i32 {
    let (low, high) = range;
    if high <= low {
        return low as i32;
    }
    rng.random_range(low..=high) as i32
}

/// Shape of the pond in model space, centered on the origin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum WorldBoundary {
    Circle { radius: f64 },
    Ellipse { semi_x: f64, semi_y: f64 },
}

impl WorldBoundary {
    fn semi_axes(self) -> (f64, f64) {
        match self {
            Self::Circle { radius } => (radius, radius),
            Self::Ellipse { semi_x, semi_y } => (semi_x, semi_y),
        }
    }

    /// Distance from center normalized through the semi-axes: 1.0 lies
    /// exactly on the boundary for both circular and elliptical ponds.
    #[must_use]
    pub fn normalized_distance(self, position: Vec2) -> f64 {
        let (semi_x, semi_y) = self.semi_axes();
        let nx = position.x / semi_x;
        let ny = position.y / semi_y;
        nx.hypot(ny)
    }

    /// Whether `position` lies on or inside the boundary.
    #[must_use]
    pub fn contains(self, position: Vec2) -> bool {
        self.normalized_distance(position) <= 1.0
    }

    /// Pull an outside point back onto the boundary along the line to center.
    #[must_use]
    pub fn clamp_to_edge(self, position: Vec2) -> Vec2 {
        let reach = self.normalized_distance(position);
        if reach <= 1.0 {
            position
        } else {
            position * (1.0 / reach)
        }
    }

    /// Uniformly distributed random point inside the boundary.
    #[must_use]
    pub fn random_point_inside(self, rng: &mut SmallRng) -> Vec2 {
        let (semi_x, semi_y) = self.semi_axes();
        let radius = rng.random::<f64>().sqrt();
        let theta = rng.random_range(0.0..TAU);
        Vec2::new(radius * theta.cos() * semi_x, radius * theta.sin() * semi_y)
    }

    fn validate(self) -> Result<(), WorldError> {
        let (semi_x, semi_y) = self.semi_axes();
        if semi_x <= 0.0 || semi_y <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "world boundary axes must be positive",
            ));
        }
        Ok(())
    }
}

/// Static configuration for a pond world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PondConfig {
    /// Pond shape, centered on the model-space origin.
    pub boundary: WorldBoundary,
    /// Simulation cadence in ticks per second; per-second personality speeds
    /// are converted through this, never through an implicit constant.
    pub tick_rate: f64,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Tracker association gate in model units.
    pub match_gate: f64,
    /// Track speed below which a human counts as standing still.
    pub still_speed_epsilon: f64,
    /// Consecutive still ticks required before curiosity may trigger.
    pub curious_still_ticks: u32,
    /// Per-tick probability scale of the curiosity draw.
    pub curious_check_probability: f64,
    /// Distance at which a curious bird is satisfied and idles again.
    pub curious_arrival_distance: f64,
    /// Per-tick probability of a spontaneous chirp from a relaxed state.
    pub chirp_probability: f64,
    /// Idle duration bounds, in frames.
    pub idle_duration_range: (u32, u32),
    /// Foraging duration bounds, in frames.
    pub forage_duration_range: (u32, u32),
    /// How far an exploration target is sampled, in model units.
    pub explore_distance_range: (f64, f64),
    /// Arrival tolerance for exploration targets.
    pub explore_arrival_epsilon: f64,
    /// Velocity gain of the territorial pixel-space repulsion.
    pub spacing_gain: f64,
    /// Velocity gain of the soft boundary repulsion.
    pub boundary_repulsion_gain: f64,
    /// Minimum falloff fraction; pattern edges never go fully dark.
    pub min_falloff: f64,
    /// How strongly chirp brightness and body size grow the lit span.
    pub chirp_spread_gain: f64,
    /// Maximum number of recent tick summaries retained in memory.
    pub history_capacity: usize,
}

impl Default for PondConfig {
    fn default() -> Self {
        Self {
            boundary: WorldBoundary::Circle { radius: 4.0 },
            tick_rate: 60.0,
            rng_seed: None,
            match_gate: 0.5,
            still_speed_epsilon: 0.05,
            curious_still_ticks: 90,
            curious_check_probability: 0.01,
            curious_arrival_distance: 0.5,
            chirp_probability: 0.002,
            idle_duration_range: (120, 300),
            forage_duration_range: (90, 240),
            explore_distance_range: (1.0, 3.0),
            explore_arrival_epsilon: 0.1,
            spacing_gain: 0.002,
            boundary_repulsion_gain: 0.01,
            min_falloff: 0.3,
            chirp_spread_gain: 0.25,
            history_capacity: 256,
        }
    }
}

impl PondConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), WorldError> {
        self.boundary.validate()?;
        if self.tick_rate <= 0.0 {
            return Err(WorldError::InvalidConfig("tick_rate must be positive"));
        }
        if self.match_gate <= 0.0 {
            return Err(WorldError::InvalidConfig("match_gate must be positive"));
        }
        if self.still_speed_epsilon < 0.0 {
            return Err(WorldError::InvalidConfig(
                "still_speed_epsilon must be non-negative",
            ));
        }
        if !(0.0..=1.0).contains(&self.min_falloff) {
            return Err(WorldError::InvalidConfig(
                "min_falloff must lie within [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.chirp_probability)
            || !(0.0..=1.0).contains(&self.curious_check_probability)
        {
            return Err(WorldError::InvalidConfig(
                "probabilities must lie within [0, 1]",
            ));
        }
        if self.idle_duration_range.0 > self.idle_duration_range.1
            || self.forage_duration_range.0 > self.forage_duration_range.1
        {
            return Err(WorldError::InvalidConfig(
                "duration ranges must be ordered low..high",
            ));
        }
        if self.explore_distance_range.0 <= 0.0
            || self.explore_distance_range.0 >= self.explore_distance_range.1
        {
            return Err(WorldError::InvalidConfig(
                "explore_distance_range must be positive and ordered",
            ));
        }
        if self.explore_arrival_epsilon <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "explore_arrival_epsilon must be positive",
            ));
        }
        if self.spacing_gain < 0.0 || self.boundary_repulsion_gain < 0.0 {
            return Err(WorldError::InvalidConfig(
                "repulsion gains must be non-negative",
            ));
        }
        if self.chirp_spread_gain < 0.0 {
            return Err(WorldError::InvalidConfig(
                "chirp_spread_gain must be non-negative",
            ));
        }
        if self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG, generating a seed from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Resolves competing light sources into one color per logical pixel.
///
/// Winner-takes-all: each pixel records the highest falloff-adjusted
/// brightness seen this tick and only that agent's color contributes. Ties
/// go to the first-evaluated bird: deterministic, but arbitrary.
#[derive(Debug, Clone)]
pub struct LightCompositor {
    min_falloff: f64,
    chirp_spread_gain: f64,
    brightness: Vec<f64>,
    winners: Vec<Option<usize>>,
    frame: Vec<[u8; 3]>,
}

impl LightCompositor {
    /// Create a compositor; buffers are sized lazily to the layout.
    #[must_use]
    pub fn new(min_falloff: f64, chirp_spread_gain: f64) -> Self {
        Self {
            min_falloff,
            chirp_spread_gain,
            brightness: Vec::new(),
            winners: Vec::new(),
            frame: Vec::new(),
        }
    }

    /// Rebuild the frame for the current bird states. Pixels no bird wins
    /// stay black.
    pub fn compose(&mut self, layout: &PixelLayout, birds: &[BirdAgent]) -> &[[u8; 3]] {
        let pixel_count = layout.len();
        if self.frame.len() != pixel_count {
            self.brightness.resize(pixel_count, 0.0);
            self.winners.resize(pixel_count, None);
            self.frame.resize(pixel_count, [0; 3]);
        }
        self.brightness.fill(0.0);
        self.winners.fill(None);
        self.frame.fill([0; 3]);

        let centers: Vec<usize> = birds
            .iter()
            .map(|bird| layout.nearest_pixel(bird.position))
            .collect();

        for (bird_index, bird) in birds.iter().enumerate() {
            let (spread, brightness) = bird.light_extent(self.chirp_spread_gain);
            if brightness <= 0.0 {
                continue;
            }
            let center = centers[bird_index] as i64;
            let reach = i64::from(spread);
            for offset in -reach..=reach {
                let pixel = center + offset;
                if pixel < 0 || pixel >= pixel_count as i64 {
                    continue;
                }
                let pixel = pixel as usize;
                let linear = if spread == 0 {
                    1.0
                } else {
                    (f64::from(spread) - offset.abs() as f64) / f64::from(spread)
                };
                let falloff = self.min_falloff + (1.0 - self.min_falloff) * linear;
                let candidate = brightness * falloff;
                if candidate > self.brightness[pixel] {
                    self.brightness[pixel] = candidate;
                    self.winners[pixel] = Some(bird_index);
                }
            }
        }

        for pixel in 0..pixel_count {
            let Some(bird_index) = self.winners[pixel] else {
                continue;
            };
            let bird = &birds[bird_index];
            let offset = pixel as i64 - centers[bird_index] as i64;
            let color = match role_at_offset(bird.active_pattern(), offset) {
                ColorRole::Base => bird.personality.base_color,
                ColorRole::Accent => bird.personality.accent_color,
            };
            self.frame[pixel] = scale_color(color, self.brightness[pixel]);
        }

        &self.frame
    }

    /// Latest composited frame.
    #[must_use]
    pub fn frame(&self) -> &[[u8; 3]] {
        &self.frame
    }
}

fn scale_color(color: [u8; 3], level: f64) -> [u8; 3] {
    color.map(|channel| (f64::from(channel) * level).round().clamp(0.0, 255.0) as u8)
}

/// Per-tick digest of the world, retained in a bounded history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickSummary {
    pub tick: Tick,
    pub track_count: usize,
    pub chirping: usize,
    pub fleeing: usize,
}

/// The whole simulation: tracker, cast, physics, and compositor, advanced
/// synchronously by [`PondWorld::step`] in a fixed stage order.
pub struct PondWorld {
    config: PondConfig,
    layout: PixelLayout,
    tick: Tick,
    rng: SmallRng,
    tracker: ObjectTracker,
    birds: Vec<BirdAgent>,
    compositor: LightCompositor,
    cues: Box<dyn CueSink>,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for PondWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PondWorld")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("pixel_count", &self.layout.len())
            .field("bird_count", &self.birds.len())
            .field("track_count", &self.tracker.tracks().len())
            .finish()
    }
}

impl PondWorld {
    /// Instantiate a world with the default (silent) cue sink.
    pub fn new(
        config: PondConfig,
        layout: PixelLayout,
        roster: Vec<BirdPersonality>,
    ) -> Result<Self, WorldError> {
        Self::with_cue_sink(config, layout, roster, Box::new(NullCueSink))
    }

    /// Instantiate a world, placing each bird of `roster` at a random
    /// position inside the pond boundary.
    pub fn with_cue_sink(
        config: PondConfig,
        layout: PixelLayout,
        roster: Vec<BirdPersonality>,
        cues: Box<dyn CueSink>,
    ) -> Result<Self, WorldError> {
        config.validate()?;
        let mut rng = config.seeded_rng();
        let birds = roster
            .into_iter()
            .map(|personality| {
                let position = config.boundary.random_point_inside(&mut rng);
                BirdAgent::spawn(personality, position, &mut rng, config.idle_duration_range)
            })
            .collect();
        let tracker = ObjectTracker::new(
            config.tick_rate,
            config.match_gate,
            config.still_speed_epsilon,
        );
        let compositor = LightCompositor::new(config.min_falloff, config.chirp_spread_gain);
        let history = VecDeque::with_capacity(config.history_capacity);
        Ok(Self {
            config,
            layout,
            tick: Tick::zero(),
            rng,
            tracker,
            birds,
            compositor,
            cues,
            history,
        })
    }

    /// Advance the world one tick: detections → tracks → behavior → physics
    /// → composited frame.
    pub fn step(&mut self, detections: &[Detection]) -> TickSummary {
        self.tracker.update(detections);
        self.stage_behavior();
        self.stage_physics();
        self.compositor.compose(&self.layout, &self.birds);
        self.tick = self.tick.next();

        let summary = TickSummary {
            tick: self.tick,
            track_count: self.tracker.tracks().len(),
            chirping: self.count_state(BirdState::Chirping),
            fleeing: self.count_state(BirdState::Fleeing),
        };
        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
        summary
    }

    fn stage_behavior(&mut self) {
        let Self {
            config,
            layout,
            tracker,
            birds,
            rng,
            cues,
            ..
        } = self;
        let centers: Vec<usize> = birds
            .iter()
            .map(|bird| layout.nearest_pixel(bird.position))
            .collect();
        let positions: Vec<Vec2> = birds.iter().map(|bird| bird.position).collect();

        for (index, bird) in birds.iter_mut().enumerate() {
            let peers: Vec<PeerPixel> = centers
                .iter()
                .zip(&positions)
                .enumerate()
                .filter(|(peer_index, _)| *peer_index != index)
                .map(|(_, (&center, &position))| PeerPixel { center, position })
                .collect();
            bird.behave(
                tracker.tracks(),
                centers[index],
                &peers,
                config,
                rng,
                cues.as_mut(),
            );
        }
    }

    fn stage_physics(&mut self) {
        let boundary = self.config.boundary;
        let gain = self.config.boundary_repulsion_gain;
        for bird in &mut self.birds {
            // A chirping bird does not translate. Full stop, no boundary work.
            if bird.state == BirdState::Chirping {
                continue;
            }
            let reach = boundary.normalized_distance(bird.position);
            if reach > SOFT_BOUNDARY_START {
                let strength = (reach - SOFT_BOUNDARY_START) / (1.0 - SOFT_BOUNDARY_START);
                let inward = (Vec2::ZERO - bird.position).normalized();
                bird.velocity += inward * (strength * gain);
            }
            bird.position += bird.velocity;
            if !boundary.contains(bird.position) {
                bird.position = boundary.clamp_to_edge(bird.position);
                bird.velocity = bird.velocity * -BOUNDARY_RESTITUTION;
            }
        }
    }

    fn count_state(&self, state: BirdState) -> usize {
        self.birds.iter().filter(|bird| bird.state == state).count()
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &PondConfig {
        &self.config
    }

    /// Mutable access to the configuration (for hot edits).
    ///
    /// Behavioral knobs are read live every tick; structural values such as
    /// the boundary or tick rate should be set before construction instead.
    #[must_use]
    pub fn config_mut(&mut self) -> &mut PondConfig {
        &mut self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// The pixel layout this world renders onto.
    #[must_use]
    pub fn layout(&self) -> &PixelLayout {
        &self.layout
    }

    /// Current track snapshot.
    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        self.tracker.tracks()
    }

    /// Read-only view of the cast.
    #[must_use]
    pub fn birds(&self) -> &[BirdAgent] {
        &self.birds
    }

    /// Mutable access to the cast (tests and scripted scenarios).
    #[must_use]
    pub fn birds_mut(&mut self) -> &mut [BirdAgent] {
        &mut self.birds
    }

    /// The frame composited by the most recent [`PondWorld::step`].
    #[must_use]
    pub fn frame(&self) -> &[[u8; 3]] {
        self.compositor.frame()
    }

    /// Iterate over retained tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Replace the audio cue sink.
    pub fn set_cue_sink(&mut self, cues: Box<dyn CueSink>) {
        self.cues = cues;
    }

    /// Borrow the world RNG mutably for deterministic sampling.
    #[must_use]
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }
}
