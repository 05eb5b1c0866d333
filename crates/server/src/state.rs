use std::sync::Arc;

use fateticket_core::{
    Authenticator, BatchGenerator, Config, FateConfig, FateStore, SanitizedConfig,
};

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    store: Arc<dyn FateStore>,
    generator: BatchGenerator,
}

impl AppState {
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn FateStore>,
    ) -> Self {
        let generator = BatchGenerator::new(Arc::clone(&store), config.fate.clone());
        Self {
            config,
            authenticator,
            store,
            generator,
        }
    }

    /// Replace the generator with one using a fixed RNG seed.
    pub fn with_generator_seed(mut self, seed: u64) -> Self {
        self.generator =
            BatchGenerator::new(Arc::clone(&self.store), self.config.fate.clone()).with_seed(seed);
        self
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn fate_config(&self) -> &FateConfig {
        &self.config.fate
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn store(&self) -> &dyn FateStore {
        self.store.as_ref()
    }

    pub fn generator(&self) -> &BatchGenerator {
        &self.generator
    }
}
