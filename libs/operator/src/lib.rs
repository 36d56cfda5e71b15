pub mod cache;
pub mod conditions;
pub mod controller;
pub mod crd;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod model;
pub mod telemetry;
