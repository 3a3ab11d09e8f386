//! Errors for selecting and constructing engine variants

use engine_bridge::BridgeError;
use thiserror::Error;

use crate::variant::EngineVariant;

pub type VariantResult<T> = Result<T, VariantError>;

#[derive(Error, Debug)]
pub enum VariantError {
    /// The variant exists but no engine for it is linked into this build.
    #[error("engine variant {0} is not available in this build")]
    Unavailable(EngineVariant),

    #[error("unknown engine variant: {0}")]
    UnknownVariant(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_names_variant() {
        let err = VariantError::Unavailable(EngineVariant::Fairy);
        assert_eq!(err.to_string(), "engine variant fairy is not available in this build");
    }

    #[test]
    fn test_bridge_errors_convert() {
        let err: VariantError = BridgeError::StdioBusy.into();
        assert!(matches!(err, VariantError::Bridge(BridgeError::StdioBusy)));
    }
}
