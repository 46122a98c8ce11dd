//! Scoring Tests
//!
//! Compatibility scoring laws checked through the public API.

use approx::assert_relative_eq;
use test_case::test_case;

use segue::library::{FeatureSnapshot, HarmonicKey, Library};
use segue::scoring::{harmonic_component, CompatibilityScorer, ScorerConfig};

fn track(id: &str, bpm: f64, key: &str) -> FeatureSnapshot {
    FeatureSnapshot::new(id).with_bpm(bpm).with_key(key.parse().unwrap())
}

#[test]
fn test_reference_scenario() {
    let a = track("a", 120.0, "8A").with_embedding(vec![1.0, 0.0]);
    let b = track("b", 124.0, "9A").with_embedding(vec![0.8, 0.6]);
    let score = CompatibilityScorer::default().score(&a, &b).unwrap();

    assert_relative_eq!(score.bpm, 1.0 / 3.0, epsilon = 1e-9);
    assert_relative_eq!(score.harmonic, 0.85, epsilon = 1e-12);
    assert_relative_eq!(score.semantic.unwrap(), 0.9, epsilon = 1e-6);
    assert_relative_eq!(score.total, 0.658_333, epsilon = 1e-5);
}

#[test]
fn test_identical_tracks_score_one() {
    let scorer = CompatibilityScorer::default();
    for t in [
        track("x", 128.0, "5B").with_embedding(vec![0.3, -0.2, 0.9]),
        track("y", 87.5, "12A"),
    ] {
        let score = scorer.score(&t, &t).unwrap();
        assert_relative_eq!(score.total, 1.0, epsilon = 1e-9);
    }
}

#[test]
fn test_bpm_score_falls_with_distance_until_zero() {
    let scorer = CompatibilityScorer::default();
    let anchor = track("anchor", 120.0, "8A");
    let mut previous = f64::INFINITY;
    for step in 0..=8 {
        let other = track("other", 120.0 + step as f64, "8A");
        let bpm = scorer.score(&anchor, &other).unwrap().bpm;
        if bpm > 0.0 {
            assert!(bpm < previous, "not decreasing at +{} bpm", step);
        }
        previous = bpm;
    }
    // 6 bpm is the 5% bound at 120
    assert_eq!(scorer.score(&anchor, &track("edge", 126.0, "8A")).unwrap().bpm, 0.0);
    assert_eq!(scorer.score(&anchor, &track("past", 128.0, "8A")).unwrap().bpm, 0.0);
}

#[test_case("8A", "8A", 1.0 ; "same key")]
#[test_case("8A", "9A", 0.85 ; "wheel neighbour")]
#[test_case("8A", "8B", 0.85 ; "relative major")]
#[test_case("8A", "10A", 0.6 ; "two steps")]
#[test_case("1A", "7B", 0.0 ; "opposite side")]
fn test_harmonic_component(a: &str, b: &str, expected: f64) {
    let a: HarmonicKey = a.parse().unwrap();
    let b: HarmonicKey = b.parse().unwrap();
    let forward = harmonic_component(&a, &b, 0.85, 0.25);
    let backward = harmonic_component(&b, &a, 0.85, 0.25);
    assert_relative_eq!(forward, expected, epsilon = 1e-12);
    assert_eq!(forward, backward);
}

#[test]
fn test_missing_features_are_excluded_from_recommendations() {
    let mut lib = Library::new();
    lib.insert(track("anchor", 120.0, "8A"));
    lib.insert(track("good", 121.0, "8A"));
    lib.insert(FeatureSnapshot::new("unanalysed"));
    let lib = lib.snapshot();

    let scorer = CompatibilityScorer::new(ScorerConfig::default());
    let anchor = lib.get(&"anchor".into()).unwrap();
    let ranked = scorer.recommend(anchor, lib.tracks()).unwrap();
    let ids: Vec<&str> = ranked.iter().map(|s| s.track_b.as_str()).collect();
    assert_eq!(ids, vec!["good"]);
}
