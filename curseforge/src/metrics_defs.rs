//! Metrics definitions for the CurseForge client.

use shared::metrics_defs::{MetricDef, MetricType};

pub const UPSTREAM_REQUESTS: MetricDef = MetricDef {
    name: "upstream.requests",
    metric_type: MetricType::Counter,
    description: "Requests sent to the upstream API. Tagged with status.",
};

pub const UPSTREAM_REQUEST_DURATION: MetricDef = MetricDef {
    name: "upstream.request.duration",
    metric_type: MetricType::Histogram,
    description: "Upstream request duration in seconds",
};

pub const REFERENCE_REFRESH_DURATION: MetricDef = MetricDef {
    name: "reference.refresh.duration",
    metric_type: MetricType::Histogram,
    description: "Time to reload games and categories in seconds",
};

pub const REFERENCE_GAMES: MetricDef = MetricDef {
    name: "reference.games",
    metric_type: MetricType::Gauge,
    description: "Number of games in the reference data",
};

pub const ALL_METRICS: &[MetricDef] = &[
    UPSTREAM_REQUESTS,
    UPSTREAM_REQUEST_DURATION,
    REFERENCE_REFRESH_DURATION,
    REFERENCE_GAMES,
];
