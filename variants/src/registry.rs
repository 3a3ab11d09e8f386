use std::collections::BTreeMap;

use engine_bridge::{Bridge, BridgeConfig, Engine, OsPipes};
use serde::Serialize;

use crate::error::{VariantError, VariantResult};
use crate::variant::EngineVariant;

type Factory = Box<dyn Fn() -> Box<dyn Engine> + Send + Sync>;

/// Which engine to construct for each variant.
#[derive(Default)]
pub struct VariantRegistry {
    factories: BTreeMap<EngineVariant, Factory>,
}

/// One row of [`VariantRegistry::describe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantInfo {
    pub variant: EngineVariant,
    pub description: &'static str,
    pub protocol: String,
    pub feature: &'static str,
    pub available: bool,
}

impl VariantRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The variants whose engine libraries are linked into this build.
    pub fn linked() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::empty();
        #[cfg(feature = "hce")]
        registry.register(EngineVariant::Classical, crate::foreign::hce::engine);
        #[cfg(feature = "nnue")]
        registry.register(EngineVariant::Nnue, crate::foreign::nnue::engine);
        #[cfg(feature = "fairy")]
        registry.register(EngineVariant::Fairy, crate::foreign::fairy::engine);
        #[cfg(feature = "sf16")]
        registry.register(EngineVariant::Sf16, crate::foreign::sf16::engine);
        registry
    }

    /// Every variant backed by a [`MockEngine`](crate::mock::MockEngine).
    #[cfg(any(test, feature = "mock"))]
    pub fn mock() -> Self {
        let mut registry = Self::empty();
        for variant in EngineVariant::ALL {
            registry.register(variant, move || {
                Box::new(crate::mock::MockEngine::new(variant)) as Box<dyn Engine>
            });
        }
        registry
    }

    /// Register (or replace) the factory for `variant`.
    pub fn register<F>(&mut self, variant: EngineVariant, factory: F)
    where
        F: Fn() -> Box<dyn Engine> + Send + Sync + 'static,
    {
        tracing::debug!("Registered engine for variant {}", variant);
        self.factories.insert(variant, Box::new(factory));
    }

    pub fn is_available(&self, variant: EngineVariant) -> bool {
        self.factories.contains_key(&variant)
    }

    pub fn available(&self) -> Vec<EngineVariant> {
        self.factories.keys().copied().collect()
    }

    pub fn describe(&self) -> Vec<VariantInfo> {
        EngineVariant::ALL
            .into_iter()
            .map(|variant| VariantInfo {
                variant,
                description: variant.description(),
                protocol: variant.protocol().to_string(),
                feature: variant.feature(),
                available: self.is_available(variant),
            })
            .collect()
    }

    pub fn engine(&self, variant: EngineVariant) -> VariantResult<Box<dyn Engine>> {
        let factory = self
            .factories
            .get(&variant)
            .ok_or(VariantError::Unavailable(variant))?;
        Ok(factory())
    }

    /// A fresh, unstarted [`Bridge`] for `variant`.
    pub fn bridge(&self, variant: EngineVariant, config: BridgeConfig) -> VariantResult<Bridge> {
        let engine = self.engine(variant)?;
        Ok(Bridge::init_with(engine, config, &OsPipes)?)
    }
}
