//! Metrics definitions for the coordinator.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SELECTION_SELECTED: MetricDef = MetricDef {
    name: "coordinator.selection.selected",
    metric_type: MetricType::Counter,
    description: "Selections that reserved a relay for an endpoint",
};

pub const SELECTION_COOLDOWN: MetricDef = MetricDef {
    name: "coordinator.selection.cooldown",
    metric_type: MetricType::Counter,
    description: "Selections where every healthy relay was cooling down for the endpoint",
};

pub const SELECTION_NO_RELAY: MetricDef = MetricDef {
    name: "coordinator.selection.no_relay",
    metric_type: MetricType::Counter,
    description: "Selections where every relay in the pool was flagged unhealthy",
};

pub const SELECTION_DURATION: MetricDef = MetricDef {
    name: "coordinator.selection.duration",
    metric_type: MetricType::Histogram,
    description: "Time spent in the atomic selection against the store in seconds",
};

pub const RELAY_MARKED_UNHEALTHY: MetricDef = MetricDef {
    name: "coordinator.relay.marked_unhealthy",
    metric_type: MetricType::Counter,
    description: "Number of times a relay was flagged unhealthy",
};

pub const STORE_ERROR: MetricDef = MetricDef {
    name: "coordinator.store.error",
    metric_type: MetricType::Counter,
    description: "Failed calls to the coordination store",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SELECTION_SELECTED,
    SELECTION_COOLDOWN,
    SELECTION_NO_RELAY,
    SELECTION_DURATION,
    RELAY_MARKED_UNHEALTHY,
    STORE_ERROR,
];
