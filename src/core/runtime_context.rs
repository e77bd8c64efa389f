use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::image_decoder::{DefaultImageDecoder, ImageDecoder};
use crate::inference::{ModelProvider, UnavailableModelProvider};

/// Collaborators shared by every step of a run.
#[derive(Clone)]
pub struct RuntimeContext {
    pub model_provider: Arc<dyn ModelProvider>,
    pub api_key: Option<String>,
    pub id_generator: Arc<dyn IdGenerator>,
    pub image_decoder: Arc<dyn ImageDecoder>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            model_provider: Arc::new(UnavailableModelProvider),
            api_key: None,
            id_generator: Arc::new(RealIdGenerator::default()),
            image_decoder: Arc::new(DefaultImageDecoder),
        }
    }
}

impl RuntimeContext {
    pub fn with_model_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.model_provider = provider;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn with_image_decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.image_decoder = decoder;
        self
    }
}

/// Source of fresh detection identifiers.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

// --- Real implementations ---

pub struct RealIdGenerator;

impl Default for RealIdGenerator {
    fn default() -> Self {
        Self
    }
}

impl IdGenerator for RealIdGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

// --- Fake implementations ---

pub struct FakeIdGenerator {
    pub prefix: String,
    pub counter: AtomicU64,
}

impl FakeIdGenerator {
    pub fn new(prefix: String) -> Self {
        Self {
            prefix,
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for FakeIdGenerator {
    fn next_id(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, id)
    }
}
