use std::sync::Arc;

use crate::compress::{self, Compressor};
use crate::config::Config;
use crate::detect::Detector;

/// Shared, read-only handler state.
#[derive(Clone)]
pub struct AppState {
    pub detector: Arc<Detector>,
    pub compressor: Arc<dyn Compressor>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(detector: Detector, compressor: Arc<dyn Compressor>, config: Config) -> Self {
        Self {
            detector: Arc::new(detector),
            compressor,
            config: Arc::new(config),
        }
    }

    /// Build the engine and compression backend named in `config`.
    pub fn from_config(config: Config) -> Self {
        let detector = Detector::from_config(&config);
        let compressor = compress::from_config(&config.compression);
        Self::new(detector, compressor, config)
    }
}
