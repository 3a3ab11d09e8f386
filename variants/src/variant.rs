use std::fmt;
use std::str::FromStr;

use engine_bridge::Protocol;
use serde::{Deserialize, Serialize};

use crate::error::VariantError;

/// The engines this workspace knows how to host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineVariant {
    /// Stockfish with the hand-crafted evaluation.
    Classical,
    /// Current Stockfish with an NNUE evaluation.
    Nnue,
    /// Fairy-Stockfish, for chess variants.
    ///
    /// Starts in UCI like the others; sending `xboard` switches it to the
    /// XBoard protocol for the rest of the session.
    Fairy,
    /// Stockfish 16.
    Sf16,
}

impl EngineVariant {
    pub const ALL: [EngineVariant; 4] = [Self::Classical, Self::Nnue, Self::Fairy, Self::Sf16];

    pub fn name(self) -> &'static str {
        match self {
            Self::Classical => "classical",
            Self::Nnue => "nnue",
            Self::Fairy => "fairy",
            Self::Sf16 => "sf16",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Classical => "Stockfish, hand-crafted evaluation",
            Self::Nnue => "Stockfish, NNUE evaluation",
            Self::Fairy => "Fairy-Stockfish (chess variants)",
            Self::Sf16 => "Stockfish 16",
        }
    }

    /// Cargo feature that links this variant's engine.
    pub fn feature(self) -> &'static str {
        match self {
            Self::Classical => "hce",
            Self::Nnue => "nnue",
            Self::Fairy => "fairy",
            Self::Sf16 => "sf16",
        }
    }

    /// Protocol spoken right after start, before any `xboard` command.
    pub fn protocol(self) -> Protocol {
        Protocol::Uci
    }
}

impl fmt::Display for EngineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EngineVariant {
    type Err = VariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classical" | "hce" => Ok(Self::Classical),
            "nnue" | "latest" => Ok(Self::Nnue),
            "fairy" | "fairy-stockfish" => Ok(Self::Fairy),
            "sf16" | "stockfish16" => Ok(Self::Sf16),
            _ => Err(VariantError::UnknownVariant(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip_through_from_str() {
        for variant in EngineVariant::ALL {
            assert_eq!(variant.name().parse::<EngineVariant>().unwrap(), variant);
            assert_eq!(variant.to_string(), variant.name());
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("HCE".parse::<EngineVariant>().unwrap(), EngineVariant::Classical);
        assert_eq!("latest".parse::<EngineVariant>().unwrap(), EngineVariant::Nnue);
        assert_eq!(
            " fairy-stockfish ".parse::<EngineVariant>().unwrap(),
            EngineVariant::Fairy
        );
    }

    #[test]
    fn test_unknown_variant() {
        let err = "crafty".parse::<EngineVariant>().unwrap_err();
        assert!(matches!(err, VariantError::UnknownVariant(name) if name == "crafty"));
    }

    #[test]
    fn test_every_variant_starts_in_uci() {
        for variant in EngineVariant::ALL {
            assert_eq!(variant.protocol(), Protocol::Uci, "{variant}");
        }
    }

    #[test]
    fn test_features_are_distinct() {
        let mut features: Vec<_> = EngineVariant::ALL.iter().map(|v| v.feature()).collect();
        features.sort_unstable();
        features.dedup();
        assert_eq!(features.len(), 4);
    }
}
