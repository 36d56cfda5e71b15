//! Small kube-client helpers shared by the controller and the metal agent:
//! a Prometheus instrumentation layer and the URL-path templating it relies
//! on to avoid per-resource-name label cardinality.

pub mod client;
pub mod metrics;
pub mod url;
