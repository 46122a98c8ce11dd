//! Harmonic keys and the Camelot wheel
//!
//! Keys are stored as a pitch class plus mode. The wheel position puts keys a
//! fifth apart next to each other; a major key and its relative minor share a
//! wheel number and differ only in mode ("8A" / "8B").

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SegueError};

/// Number of positions on the wheel
pub const WHEEL_SIZE: u8 = 12;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Major or minor tonality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Major,
    Minor,
}

impl Mode {
    /// Camelot letter: A for minor, B for major
    pub fn camelot_letter(&self) -> char {
        match self {
            Mode::Minor => 'A',
            Mode::Major => 'B',
        }
    }
}

/// A musical key: pitch class 0-11 (C = 0) plus mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HarmonicKey {
    pitch_class: u8,
    mode: Mode,
}

impl HarmonicKey {
    /// Create a key, rejecting pitch classes outside 0-11
    pub fn new(pitch_class: u8, mode: Mode) -> Result<Self> {
        if pitch_class >= WHEEL_SIZE {
            return Err(SegueError::InvalidParameter {
                param: "pitch_class".to_string(),
                value: pitch_class.to_string(),
                expected: "0 to 11".to_string(),
            });
        }
        Ok(Self { pitch_class, mode })
    }

    pub fn pitch_class(&self) -> u8 {
        self.pitch_class
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Camelot number, 1 to 12 (C major = 8B, A minor = 8A)
    pub fn camelot_number(&self) -> u8 {
        let fifths = (self.pitch_class as u16 * 7 % 12) as u8;
        let shift = match self.mode {
            Mode::Major => 7,
            Mode::Minor => 4,
        };
        (fifths + shift) % WHEEL_SIZE + 1
    }

    /// Zero-based wheel position (camelot number - 1)
    pub fn wheel_position(&self) -> u8 {
        self.camelot_number() - 1
    }

    /// The key that shares this key's wheel number in the other mode
    pub fn relative(&self) -> HarmonicKey {
        match self.mode {
            Mode::Major => HarmonicKey {
                pitch_class: (self.pitch_class + 9) % 12,
                mode: Mode::Minor,
            },
            Mode::Minor => HarmonicKey {
                pitch_class: (self.pitch_class + 3) % 12,
                mode: Mode::Major,
            },
        }
    }

    /// Build a key from its Camelot code parts
    pub fn from_camelot(number: u8, mode: Mode) -> Result<Self> {
        if !(1..=WHEEL_SIZE).contains(&number) {
            return Err(SegueError::InvalidParameter {
                param: "camelot_number".to_string(),
                value: number.to_string(),
                expected: "1 to 12".to_string(),
            });
        }
        let shift = match mode {
            Mode::Major => 7,
            Mode::Minor => 4,
        };
        let fifths = (number - 1 + WHEEL_SIZE - shift) % WHEEL_SIZE;
        // 7 is its own inverse mod 12
        let pitch_class = (fifths as u16 * 7 % 12) as u8;
        Ok(Self { pitch_class, mode })
    }

    /// Steps between two keys on the wheel
    ///
    /// Circular number distance (0-6) plus one step when the modes differ.
    /// Symmetric by construction.
    pub fn wheel_distance(&self, other: &HarmonicKey) -> u8 {
        let a = self.wheel_position() as i16;
        let b = other.wheel_position() as i16;
        let raw = (a - b).unsigned_abs() as u8;
        let circular = raw.min(WHEEL_SIZE - raw);
        circular + u8::from(self.mode != other.mode)
    }

    /// Camelot code such as "8A"
    pub fn camelot_code(&self) -> String {
        format!("{}{}", self.camelot_number(), self.mode.camelot_letter())
    }
}

impl fmt::Display for HarmonicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = match self.mode {
            Mode::Major => "",
            Mode::Minor => "m",
        };
        write!(f, "{}{}", NOTE_NAMES[self.pitch_class as usize], suffix)
    }
}

impl FromStr for HarmonicKey {
    type Err = SegueError;

    /// Accepts Camelot codes ("8A", "12b"), note names ("C", "Bb", "F#"),
    /// and note names with a mode ("Am", "C# minor", "Ebmaj"). A bare note
    /// name is read as major.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SegueError::InvalidParameter {
            param: "key".to_string(),
            value: s.to_string(),
            expected: "Camelot code (8A) or note name (C, F#m, Bb minor)".to_string(),
        };

        let text = s.trim();
        if text.is_empty() {
            return Err(invalid());
        }

        if text.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            let (split, letter) = text.char_indices().next_back().ok_or_else(invalid)?;
            let number: u8 = text[..split].parse().map_err(|_| invalid())?;
            let mode = match letter.to_ascii_uppercase() {
                'A' => Mode::Minor,
                'B' => Mode::Major,
                _ => return Err(invalid()),
            };
            return HarmonicKey::from_camelot(number, mode).map_err(|_| invalid());
        }

        let mut chars = text.chars();
        let letter = chars.next().ok_or_else(invalid)?.to_ascii_uppercase();
        let natural: i16 = match letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(invalid()),
        };
        let mut rest = chars.as_str();
        let mut accidental = 0_i16;
        if let Some(stripped) = rest.strip_prefix('#').or_else(|| rest.strip_prefix('♯')) {
            accidental = 1;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('b').or_else(|| rest.strip_prefix('♭')) {
            accidental = -1;
            rest = stripped;
        }

        let mode = match rest.trim().to_ascii_lowercase().as_str() {
            "" | "maj" | "major" | "dur" => Mode::Major,
            "m" | "min" | "minor" | "moll" => Mode::Minor,
            _ => return Err(invalid()),
        };

        let pitch_class = (natural + accidental).rem_euclid(12) as u8;
        Ok(HarmonicKey { pitch_class, mode })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("C", "8B")]
    #[test_case("Am", "8A")]
    #[test_case("G", "9B")]
    #[test_case("E minor", "9A")]
    #[test_case("B", "1B")]
    #[test_case("G#m", "1A")]
    #[test_case("Abm", "1A")]
    #[test_case("E", "12B")]
    #[test_case("C#m", "12A")]
    #[test_case("Cm", "5A")]
    fn test_camelot_mapping(name: &str, code: &str) {
        let key: HarmonicKey = name.parse().unwrap();
        assert_eq!(key.camelot_code(), code);
    }

    #[test]
    fn test_camelot_roundtrip_all_codes() {
        for number in 1..=12 {
            for mode in [Mode::Major, Mode::Minor] {
                let key = HarmonicKey::from_camelot(number, mode).unwrap();
                assert_eq!(key.camelot_number(), number);
                assert_eq!(key.mode(), mode);
            }
        }
    }

    #[test]
    fn test_parse_camelot_code() {
        let key: HarmonicKey = "8A".parse().unwrap();
        assert_eq!(key.pitch_class(), 9);
        assert_eq!(key.mode(), Mode::Minor);
        let key: HarmonicKey = "12b".parse().unwrap();
        assert_eq!(key.to_string(), "E");
        assert!("13A".parse::<HarmonicKey>().is_err());
        assert!("8C".parse::<HarmonicKey>().is_err());
        assert!("H".parse::<HarmonicKey>().is_err());
        assert!("".parse::<HarmonicKey>().is_err());
    }

    #[test_case("8♭" ; "flat sign")]
    #[test_case("1♯" ; "sharp sign")]
    #[test_case("12é" ; "accented letter")]
    #[test_case("8" ; "number only")]
    fn test_malformed_camelot_code_is_rejected(text: &str) {
        assert!(text.parse::<HarmonicKey>().is_err());
    }

    #[test]
    fn test_relative_shares_wheel_number() {
        let c_major: HarmonicKey = "C".parse().unwrap();
        let rel = c_major.relative();
        assert_eq!(rel.to_string(), "Am");
        assert_eq!(rel.camelot_number(), c_major.camelot_number());
        assert_eq!(rel.relative(), c_major);
    }

    #[test]
    fn test_wheel_distance() {
        let a: HarmonicKey = "8A".parse().unwrap();
        let b: HarmonicKey = "9A".parse().unwrap();
        let c: HarmonicKey = "8B".parse().unwrap();
        let d: HarmonicKey = "2A".parse().unwrap();
        let e: HarmonicKey = "1A".parse().unwrap();
        let f: HarmonicKey = "12A".parse().unwrap();
        assert_eq!(a.wheel_distance(&a), 0);
        assert_eq!(a.wheel_distance(&b), 1);
        assert_eq!(a.wheel_distance(&c), 1);
        assert_eq!(a.wheel_distance(&d), 6);
        assert_eq!(e.wheel_distance(&f), 1);
        assert_eq!(b.wheel_distance(&c), 2);
    }
}
