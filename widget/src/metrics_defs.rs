//! Metrics definitions for the widget core.

use shared::metrics_defs::{MetricDef, MetricType};

pub const RESPONSE_CACHE_HIT: MetricDef = MetricDef {
    name: "response_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of requests served from the response cache",
};

pub const RESPONSE_CACHE_MISS: MetricDef = MetricDef {
    name: "response_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of requests not found in the response cache",
};

pub const RESPONSE_CACHE_ENTRIES: MetricDef = MetricDef {
    name: "response_cache.entries",
    metric_type: MetricType::Gauge,
    description: "Entries left in the response cache after a sweep",
};

pub const RESOLUTIONS: MetricDef = MetricDef {
    name: "resolver.resolutions",
    metric_type: MetricType::Counter,
    description: "Path resolutions. Tagged with outcome.",
};

pub const PROJECT_SYNC_DURATION: MetricDef = MetricDef {
    name: "sync.project.duration",
    metric_type: MetricType::Histogram,
    description: "Time to synchronize one project in seconds",
};

pub const PROJECT_SYNCS: MetricDef = MetricDef {
    name: "sync.project.outcome",
    metric_type: MetricType::Counter,
    description: "Project synchronizations. Tagged with outcome.",
};

pub const AUTHOR_RESYNCS: MetricDef = MetricDef {
    name: "sync.author.resyncs",
    metric_type: MetricType::Counter,
    description: "Full author resyncs performed",
};

pub const QUEUE_DROPPED: MetricDef = MetricDef {
    name: "queue.dropped",
    metric_type: MetricType::Counter,
    description: "Work items dropped because a queue was full. Tagged with queue.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    RESPONSE_CACHE_HIT,
    RESPONSE_CACHE_MISS,
    RESPONSE_CACHE_ENTRIES,
    RESOLUTIONS,
    PROJECT_SYNC_DURATION,
    PROJECT_SYNCS,
    AUTHOR_RESYNCS,
    QUEUE_DROPPED,
];
