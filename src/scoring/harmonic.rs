//! Harmonic compatibility on the Camelot wheel

use crate::library::HarmonicKey;

/// Harmonic component for two keys
///
/// 1.0 for the same key, `adjacent` for a wheel neighbour or the relative
/// major/minor, then `decay` less per further step, floored at 0.
pub fn harmonic_component(a: &HarmonicKey, b: &HarmonicKey, adjacent: f64, decay: f64) -> f64 {
    match a.wheel_distance(b) {
        0 => 1.0,
        1 => adjacent.clamp(0.0, 1.0),
        d => (adjacent - decay * (d as f64 - 1.0)).clamp(0.0, 1.0),
    }
}

/// Smallest semitone shift that moves `incoming` onto a key compatible with `target`
///
/// When the modes differ the shift aims at the relative key of `target`
/// in `incoming`'s mode. Keys that are already identical or wheel
/// neighbours need no shift. The result lies in (-6, 6].
pub fn semitone_shift(incoming: &HarmonicKey, target: &HarmonicKey) -> i32 {
    if incoming.wheel_distance(target) <= 1 {
        return 0;
    }
    let aim = if incoming.mode() == target.mode() {
        *target
    } else {
        target.relative()
    };
    let raw = (aim.pitch_class() as i32 - incoming.pitch_class() as i32).rem_euclid(12);
    if raw > 6 {
        raw - 12
    } else {
        raw
    }
}
