//! Gateway traffic metrics via external collaborators.

pub mod azure;

pub use azure::{
    default_cli_candidates, detect_cli, AzureMonitorSource, MetricsError, MetricsTarget,
    TimelinePoint, TrafficMetrics,
};
