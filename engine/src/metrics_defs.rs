//! Metrics definitions for the routing engine.

use shared::metrics_defs::{MetricDef, MetricType};

pub const ROUTE_REQUESTS: MetricDef = MetricDef {
    name: "engine.requests",
    metric_type: MetricType::Counter,
    description: "Requests handed to the routing engine",
};

pub const ROUTE_ERRORS: MetricDef = MetricDef {
    name: "engine.errors",
    metric_type: MetricType::Counter,
    description: "Requests that ended without a response",
};

pub const RELAY_REQUEST_DURATION: MetricDef = MetricDef {
    name: "engine.relay.request.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of a single relay attempt in seconds",
};

pub const RELAY_RETRIES: MetricDef = MetricDef {
    name: "engine.relay.retries",
    metric_type: MetricType::Counter,
    description: "Reselections after a timeout-class relay failure",
};

pub const FALLBACK_REQUESTS: MetricDef = MetricDef {
    name: "engine.fallback.requests",
    metric_type: MetricType::Counter,
    description: "Requests sent to the fallback service",
};

pub const FALLBACK_REJECTED: MetricDef = MetricDef {
    name: "engine.fallback.rejected",
    metric_type: MetricType::Counter,
    description: "Requests not eligible for the fallback service",
};

pub const FALLBACK_ERRORS: MetricDef = MetricDef {
    name: "engine.fallback.errors",
    metric_type: MetricType::Counter,
    description: "Fallback attempts that failed, including permit timeouts",
};

pub const FALLBACK_IN_FLIGHT: MetricDef = MetricDef {
    name: "engine.fallback.in_flight",
    metric_type: MetricType::Gauge,
    description: "Fallback permits currently held",
};

pub const ALL_METRICS: &[MetricDef] = &[
    ROUTE_REQUESTS,
    ROUTE_ERRORS,
    RELAY_REQUEST_DURATION,
    RELAY_RETRIES,
    FALLBACK_REQUESTS,
    FALLBACK_REJECTED,
    FALLBACK_ERRORS,
    FALLBACK_IN_FLIGHT,
];
