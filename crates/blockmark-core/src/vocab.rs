//! Closed marker vocabulary: symbols, rotated labels and name parsing.
//!
//! Recognition backends report a `MarkerLabel` = symbol + in-plane rotation.
//! The rotation carries the observed orientation; stripping it yields the
//! base type reported to callers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Base marker symbols. `Unknown` and `Invalid` are sentinel outcomes, not
/// printable markers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerSymbol {
    Unknown,
    Invalid,
    AngryFace,
    Arrow,
    Bullseye,
    Circle,
    Clover,
    Diamond,
    Gears,
    Lightning,
    Star5,
    Triangle,
}

impl MarkerSymbol {
    pub const ALL_PRINTABLE: [MarkerSymbol; 10] = [
        MarkerSymbol::AngryFace,
        MarkerSymbol::Arrow,
        MarkerSymbol::Bullseye,
        MarkerSymbol::Circle,
        MarkerSymbol::Clover,
        MarkerSymbol::Diamond,
        MarkerSymbol::Gears,
        MarkerSymbol::Lightning,
        MarkerSymbol::Star5,
        MarkerSymbol::Triangle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerSymbol::Unknown => "UNKNOWN",
            MarkerSymbol::Invalid => "INVALID",
            MarkerSymbol::AngryFace => "ANGRYFACE",
            MarkerSymbol::Arrow => "ARROW",
            MarkerSymbol::Bullseye => "BULLSEYE",
            MarkerSymbol::Circle => "CIRCLE",
            MarkerSymbol::Clover => "CLOVER",
            MarkerSymbol::Diamond => "DIAMOND",
            MarkerSymbol::Gears => "GEARS",
            MarkerSymbol::Lightning => "LIGHTNING",
            MarkerSymbol::Star5 => "STAR5",
            MarkerSymbol::Triangle => "TRIANGLE",
        }
    }

    /// Stable wire code; `Unknown` is -1 to match the undetermined IDs
    /// elsewhere in the wire format.
    pub fn code(&self) -> i32 {
        match self {
            MarkerSymbol::Unknown => -1,
            MarkerSymbol::Invalid => 0,
            MarkerSymbol::AngryFace => 1,
            MarkerSymbol::Arrow => 2,
            MarkerSymbol::Bullseye => 3,
            MarkerSymbol::Circle => 4,
            MarkerSymbol::Clover => 5,
            MarkerSymbol::Diamond => 6,
            MarkerSymbol::Gears => 7,
            MarkerSymbol::Lightning => 8,
            MarkerSymbol::Star5 => 9,
            MarkerSymbol::Triangle => 10,
        }
    }

    pub fn from_code(code: i32) -> Option<MarkerSymbol> {
        Some(match code {
            -1 => MarkerSymbol::Unknown,
            0 => MarkerSymbol::Invalid,
            1 => MarkerSymbol::AngryFace,
            2 => MarkerSymbol::Arrow,
            3 => MarkerSymbol::Bullseye,
            4 => MarkerSymbol::Circle,
            5 => MarkerSymbol::Clover,
            6 => MarkerSymbol::Diamond,
            7 => MarkerSymbol::Gears,
            8 => MarkerSymbol::Lightning,
            9 => MarkerSymbol::Star5,
            10 => MarkerSymbol::Triangle,
            _ => return None,
        })
    }

    fn from_upper(name: &str) -> Option<MarkerSymbol> {
        Some(match name {
            "UNKNOWN" => MarkerSymbol::Unknown,
            "INVALID" => MarkerSymbol::Invalid,
            "ANGRYFACE" => MarkerSymbol::AngryFace,
            "ARROW" => MarkerSymbol::Arrow,
            "BULLSEYE" => MarkerSymbol::Bullseye,
            "CIRCLE" => MarkerSymbol::Circle,
            "CLOVER" => MarkerSymbol::Clover,
            "DIAMOND" => MarkerSymbol::Diamond,
            "GEARS" => MarkerSymbol::Gears,
            "LIGHTNING" => MarkerSymbol::Lightning,
            "STAR5" => MarkerSymbol::Star5,
            "TRIANGLE" => MarkerSymbol::Triangle,
            _ => return None,
        })
    }
}

/// In-plane rotation of the canonical symbol, clockwise degrees.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::Deg0,
        Rotation::Deg90,
        Rotation::Deg180,
        Rotation::Deg270,
    ];

    pub fn degrees(&self) -> f32 {
        match self {
            Rotation::Deg0 => 0.0,
            Rotation::Deg90 => 90.0,
            Rotation::Deg180 => 180.0,
            Rotation::Deg270 => 270.0,
        }
    }

    pub fn from_degrees(deg: u32) -> Option<Rotation> {
        Some(match deg {
            0 => Rotation::Deg0,
            90 => Rotation::Deg90,
            180 => Rotation::Deg180,
            270 => Rotation::Deg270,
            _ => return None,
        })
    }

    /// Corner reindexing that maps a rotated observation back to canonical
    /// corner order: `canonical[perm[i]] = observed[i]`.
    pub fn corner_permutation(&self) -> [usize; 4] {
        match self {
            Rotation::Deg0 => [0, 1, 2, 3],
            Rotation::Deg90 => [1, 3, 0, 2],
            Rotation::Deg180 => [3, 2, 1, 0],
            Rotation::Deg270 => [2, 0, 3, 1],
        }
    }
}

/// A fully-qualified recognition outcome: which symbol, at which rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarkerLabel {
    pub symbol: MarkerSymbol,
    pub rotation: Rotation,
}

impl MarkerLabel {
    pub fn new(symbol: MarkerSymbol, rotation: Rotation) -> Self {
        Self { symbol, rotation }
    }

    pub fn unknown() -> Self {
        Self::new(MarkerSymbol::Unknown, Rotation::Deg0)
    }

    pub fn invalid() -> Self {
        Self::new(MarkerSymbol::Invalid, Rotation::Deg0)
    }

    /// Sentinels never verify a marker.
    pub fn is_recognizable(&self) -> bool {
        !matches!(self.symbol, MarkerSymbol::Unknown | MarkerSymbol::Invalid)
    }

    /// Strip the rotation, keeping the base symbol.
    pub fn base(&self) -> MarkerLabel {
        MarkerLabel::new(self.symbol, Rotation::Deg0)
    }

    pub fn observed_orientation_degrees(&self) -> f32 {
        self.rotation.degrees()
    }

    /// Canonical name, e.g. `MARKER_BULLSEYE_090`. Sentinels have no
    /// rotation suffix.
    pub fn name(&self) -> String {
        if !self.is_recognizable() {
            return format!("MARKER_{}", self.symbol.as_str());
        }
        format!(
            "MARKER_{}_{:03}",
            self.symbol.as_str(),
            self.rotation.degrees() as u32
        )
    }
}

impl fmt::Display for MarkerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Lookup table between names (including file names) and labels.
#[derive(Debug, Default)]
pub struct MarkerVocabulary;

impl MarkerVocabulary {
    /// Parse a label out of a marker name or file path.
    ///
    /// Directory components and the extension are dropped, the comparison is
    /// case-insensitive, a leading `MARKER_` is optional, and a trailing
    /// `_DDD` rotation suffix selects the rotated variant. Anything that does
    /// not match the vocabulary maps to `Unknown`.
    pub fn label_from_name(name: &str) -> MarkerLabel {
        let stem = name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(name);
        let stem = stem.split('.').next().unwrap_or(stem);
        let mut upper = stem.to_ascii_uppercase();

        if let Some(rest) = upper.strip_prefix("MARKER_") {
            upper = rest.to_string();
        }

        let (base, rotation) = match upper.rsplit_once('_') {
            Some((head, tail)) if tail.len() == 3 && tail.chars().all(|c| c.is_ascii_digit()) => {
                match tail.parse::<u32>().ok().and_then(Rotation::from_degrees) {
                    Some(rot) => (head.to_string(), rot),
                    None => (upper.clone(), Rotation::Deg0),
                }
            }
            _ => (upper.clone(), Rotation::Deg0),
        };

        match MarkerSymbol::from_upper(&base) {
            Some(sym) => MarkerLabel::new(sym, rotation),
            None => MarkerLabel::unknown(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_file_path() {
        let label = MarkerVocabulary::label_from_name("markers/set1/MARKER_bullseye_090.png");
        assert_eq!(label.symbol, MarkerSymbol::Bullseye);
        assert_eq!(label.rotation, Rotation::Deg90);
        assert_eq!(label.observed_orientation_degrees(), 90.0);
    }

    #[test]
    fn prefix_and_rotation_are_optional() {
        let label = MarkerVocabulary::label_from_name("gears");
        assert_eq!(label.symbol, MarkerSymbol::Gears);
        assert_eq!(label.rotation, Rotation::Deg0);
    }

    #[test]
    fn unknown_name_maps_to_unknown() {
        let label = MarkerVocabulary::label_from_name("MARKER_HEXAGON_180");
        assert_eq!(label, MarkerLabel::unknown());
    }

    #[test]
    fn bad_rotation_suffix_is_part_of_the_name() {
        // 045 is not a supported rotation, and BULLSEYE_045 is not a symbol.
        let label = MarkerVocabulary::label_from_name("MARKER_BULLSEYE_045");
        assert_eq!(label, MarkerLabel::unknown());
    }

    #[test]
    fn name_round_trips() {
        for sym in MarkerSymbol::ALL_PRINTABLE {
            for rot in Rotation::ALL {
                let label = MarkerLabel::new(sym, rot);
                assert_eq!(MarkerVocabulary::label_from_name(&label.name()), label);
            }
        }
    }

    #[test]
    fn base_strips_rotation() {
        let label = MarkerLabel::new(MarkerSymbol::Clover, Rotation::Deg270);
        assert_eq!(label.base().rotation, Rotation::Deg0);
        assert_eq!(label.base().symbol, MarkerSymbol::Clover);
    }

    #[test]
    fn corner_permutations_are_bijective() {
        for rot in Rotation::ALL {
            let mut seen = [false; 4];
            for i in rot.corner_permutation() {
                assert!(!seen[i]);
                seen[i] = true;
            }
        }
    }
}
