//! The Stockfish builds hosted through `engine-bridge`.

pub mod error;
pub mod foreign;
pub mod registry;
pub mod variant;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{VariantError, VariantResult};
pub use foreign::{ForeignEngine, InitFn, MainFn};
pub use registry::{VariantInfo, VariantRegistry};
pub use variant::EngineVariant;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockEngine, MockLog};
