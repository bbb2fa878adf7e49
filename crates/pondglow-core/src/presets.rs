//! Built-in species roster for the pond installation.
//!
//! Colors, pattern shapes, speeds, and reaction distances come from the
//! installation's tuned palette; chirp keyframes encode each species' call
//! as `(seconds, brightness)` envelopes. Distances and speeds are in model
//! units (meters) and model units per second.

use crate::{
    BirdPersonality, ChirpKeyframe, ColorRole, DEFAULT_CHIRP_KEY, DRUMMING_CHIRP_KEY,
    PatternSegment,
};
use std::collections::BTreeMap;

fn segments(spans: &[(ColorRole, u32)]) -> Vec<PatternSegment> {
    spans
        .iter()
        .map(|&(role, span)| PatternSegment::new(role, span))
        .collect()
}

fn keyframes(points: &[(f64, f64)]) -> Vec<ChirpKeyframe> {
    points
        .iter()
        .map(|&(time, brightness)| ChirpKeyframe::new(time, brightness))
        .collect()
}

fn chirp_map(key: &str, points: &[(f64, f64)]) -> BTreeMap<String, Vec<ChirpKeyframe>> {
    BTreeMap::from([(key.to_string(), keyframes(points))])
}

/// The full cast of the installation, one personality per species.
#[must_use]
pub fn species_roster() -> Vec<BirdPersonality> {
    use ColorRole::{Accent, Base};

    vec![
        // Blue-and-white flycatcher: small, quick, fairly bold.
        BirdPersonality {
            species: "ooluri".to_string(),
            base_color: [48, 46, 90],
            accent_color: [0, 5, 196],
            base_pixel_count: 4,
            size: 1.0,
            pixel_personal_space: 5,
            color_pattern: segments(&[(Base, 1), (Accent, 2), (Base, 1)]),
            chirp_color_pattern: segments(&[(Base, 1), (Accent, 3), (Base, 1)]),
            movement_speed: 0.2,
            approach_speed: 0.1,
            curiosity: 0.5,
            caution_distance: 1.5,
            flee_distance: 1.0,
            percussive: false,
            chirp_keyframes: chirp_map(
                DEFAULT_CHIRP_KEY,
                &[(0.2, 1.0), (0.4, 0.8), (1.0, 1.0), (1.2, 0.8), (1.8, 1.0), (2.0, 0.0)],
            ),
        },
        // Whooper swan: large, slow, hard to rattle.
        BirdPersonality {
            species: "oohakucho".to_string(),
            base_color: [255, 229, 53],
            accent_color: [255, 200, 0],
            base_pixel_count: 6,
            size: 4.0,
            pixel_personal_space: 5,
            color_pattern: segments(&[(Base, 2), (Accent, 2), (Base, 2)]),
            chirp_color_pattern: segments(&[(Accent, 2), (Base, 4), (Accent, 2)]),
            movement_speed: 0.08,
            approach_speed: 0.02,
            curiosity: 0.1,
            caution_distance: 2.2,
            flee_distance: 1.8,
            percussive: false,
            chirp_keyframes: chirp_map(
                DEFAULT_CHIRP_KEY,
                &[(0.3, 1.0), (0.5, 0.5), (1.2, 1.0), (1.4, 0.5), (1.6, 0.0)],
            ),
        },
        // White-tailed eagle: nearly stationary, keeps everyone at a distance.
        BirdPersonality {
            species: "ojirowasi".to_string(),
            base_color: [16, 156, 145],
            accent_color: [221, 134, 7],
            base_pixel_count: 6,
            size: 5.0,
            pixel_personal_space: 5,
            color_pattern: segments(&[(Base, 2), (Accent, 2), (Base, 2)]),
            chirp_color_pattern: segments(&[(Accent, 2), (Base, 4), (Accent, 2)]),
            movement_speed: 0.05,
            approach_speed: 0.0,
            curiosity: 0.0,
            caution_distance: 3.0,
            flee_distance: 1.2,
            percussive: false,
            chirp_keyframes: chirp_map(DEFAULT_CHIRP_KEY, &[(0.1, 1.2), (0.2, 0.0)]),
        },
        // Blakiston's fish owl: dark plumage, slow double pulse.
        BirdPersonality {
            species: "shimafukuro".to_string(),
            base_color: [4, 4, 15],
            accent_color: [57, 255, 62],
            base_pixel_count: 5,
            size: 4.5,
            pixel_personal_space: 5,
            color_pattern: segments(&[(Base, 2), (Accent, 2), (Base, 2)]),
            chirp_color_pattern: segments(&[(Accent, 3), (Base, 3), (Accent, 3)]),
            movement_speed: 0.1,
            approach_speed: 0.0,
            curiosity: 0.01,
            caution_distance: 3.5,
            flee_distance: 2.8,
            percussive: false,
            chirp_keyframes: chirp_map(
                DEFAULT_CHIRP_KEY,
                &[(0.5, 0.8), (0.7, 0.0), (1.5, 0.8), (1.7, 0.0)],
            ),
        },
        // Black woodpecker: the one percussive species; its burst is drumming.
        BirdPersonality {
            species: "kumagera".to_string(),
            base_color: [3, 8, 2],
            accent_color: [157, 1, 0],
            base_pixel_count: 3,
            size: 1.5,
            pixel_personal_space: 5,
            color_pattern: segments(&[(Accent, 1), (Base, 2), (Accent, 1)]),
            chirp_color_pattern: segments(&[(Accent, 1), (Base, 3), (Accent, 1)]),
            movement_speed: 0.3,
            approach_speed: 0.1,
            curiosity: 0.2,
            caution_distance: 1.8,
            flee_distance: 1.2,
            percussive: true,
            chirp_keyframes: chirp_map(
                DRUMMING_CHIRP_KEY,
                &[(0.05, 0.0), (0.1, 1.0), (0.2, 0.0), (0.3, 1.0), (0.4, 0.0), (0.5, 1.0), (0.6, 0.0)],
            ),
        },
        // Red-crowned crane: white body, vivid red crown accent.
        BirdPersonality {
            species: "tancho".to_string(),
            base_color: [255, 255, 255],
            accent_color: [255, 0, 0],
            base_pixel_count: 5,
            size: 3.5,
            pixel_personal_space: 5,
            color_pattern: segments(&[(Base, 1), (Accent, 2), (Base, 1)]),
            chirp_color_pattern: segments(&[(Accent, 2), (Base, 3), (Accent, 2)]),
            movement_speed: 0.1,
            approach_speed: 0.05,
            curiosity: 0.3,
            caution_distance: 2.5,
            flee_distance: 2.0,
            percussive: false,
            chirp_keyframes: chirp_map(
                DEFAULT_CHIRP_KEY,
                &[(0.4, 1.0), (0.8, 0.0), (1.5, 1.0), (1.9, 0.0)],
            ),
        },
        // Siberian rubythroat: tiny, fast, very curious.
        BirdPersonality {
            species: "nogoma".to_string(),
            base_color: [21, 9, 0],
            accent_color: [164, 37, 0],
            base_pixel_count: 3,
            size: 0.8,
            pixel_personal_space: 5,
            color_pattern: segments(&[(Base, 1), (Accent, 2), (Base, 1)]),
            chirp_color_pattern: segments(&[(Accent, 1), (Base, 3), (Accent, 1)]),
            movement_speed: 0.4,
            approach_speed: 0.2,
            curiosity: 0.8,
            caution_distance: 2.0,
            flee_distance: 1.5,
            percussive: false,
            chirp_keyframes: chirp_map(DEFAULT_CHIRP_KEY, &[(0.1, 1.5), (0.15, 0.0)]),
        },
        // Long-tailed rosefinch: small, sociable, sharp double flash.
        BirdPersonality {
            species: "benimashiko".to_string(),
            base_color: [25, 9, 5],
            accent_color: [230, 0, 13],
            base_pixel_count: 3,
            size: 0.9,
            pixel_personal_space: 5,
            color_pattern: segments(&[(Accent, 1), (Base, 2), (Accent, 1)]),
            chirp_color_pattern: segments(&[(Accent, 1), (Base, 3), (Accent, 1)]),
            movement_speed: 0.35,
            approach_speed: 0.15,
            curiosity: 0.7,
            caution_distance: 2.2,
            flee_distance: 2.0,
            percussive: false,
            chirp_keyframes: chirp_map(
                DEFAULT_CHIRP_KEY,
                &[(0.2, 0.9), (0.4, 0.0), (0.6, 0.9), (0.8, 0.0)],
            ),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern_span;

    #[test]
    fn roster_holds_eight_species_with_usable_chirps() {
        let roster = species_roster();
        assert_eq!(roster.len(), 8);
        for bird in &roster {
            let key = if bird.percussive {
                DRUMMING_CHIRP_KEY
            } else {
                DEFAULT_CHIRP_KEY
            };
            let frames = bird
                .chirp_keyframes
                .get(key)
                .unwrap_or_else(|| panic!("{} lacks its {key} keyframes", bird.species));
            assert!(frames.len() >= 2, "{} needs an envelope", bird.species);
            assert!(
                frames.windows(2).all(|pair| pair[0].time < pair[1].time),
                "{} keyframes must be time-ordered",
                bird.species
            );
            assert!(pattern_span(&bird.color_pattern) > 0);
            assert!(pattern_span(&bird.chirp_color_pattern) > 0);
            assert!(bird.movement_speed > 0.0);
            assert!(bird.flee_distance <= bird.caution_distance);
        }
    }

    #[test]
    fn only_the_woodpecker_drums() {
        let roster = species_roster();
        let drummers: Vec<_> = roster
            .iter()
            .filter(|bird| bird.percussive)
            .map(|bird| bird.species.as_str())
            .collect();
        assert_eq!(drummers, ["kumagera"]);
    }
}
