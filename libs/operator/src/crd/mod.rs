//! Declarative resource types for the two kinds this operator reconciles.

pub mod inference_service;
pub mod model;

pub use inference_service::{InferenceService, InferenceServiceSpec, InferenceServiceStatus};
pub use model::{Model, ModelSpec, ModelStatus};
