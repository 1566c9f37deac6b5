//! Metrics definitions for the webhook service.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

pub const WEBHOOK_REQUESTS: MetricDef = MetricDef {
    name: "webhook.requests",
    metric_type: MetricType::Counter,
    description: "Number of inbound edit notifications received",
};

pub const WEBHOOK_RATE_LIMITED: MetricDef = MetricDef {
    name: "webhook.rate_limited",
    metric_type: MetricType::Counter,
    description: "Number of notifications rejected by the rate limiter",
};

pub const WEBHOOK_UNAUTHORIZED: MetricDef = MetricDef {
    name: "webhook.unauthorized",
    metric_type: MetricType::Counter,
    description: "Number of notifications failing inbound signature validation",
};

pub const SYNC_PASSES: MetricDef = MetricDef {
    name: "sync.passes",
    metric_type: MetricType::Counter,
    description: "Number of reconciliation passes run",
};

pub const SYNC_REPROCESS_PASSES: MetricDef = MetricDef {
    name: "sync.reprocess_passes",
    metric_type: MetricType::Counter,
    description: "Number of follow-up passes forced by mid-pass edits",
};

pub const SYNC_PASS_DURATION: MetricDef = MetricDef {
    name: "sync.pass.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete one reconciliation pass in seconds",
};

pub const GRANTS_SUCCESSFUL: MetricDef = MetricDef {
    name: "sync.grants.successful",
    metric_type: MetricType::Counter,
    description: "Number of access grants created",
};

pub const GRANTS_SKIPPED: MetricDef = MetricDef {
    name: "sync.grants.skipped",
    metric_type: MetricType::Counter,
    description: "Number of access grants that already existed",
};

pub const GRANTS_FAILED: MetricDef = MetricDef {
    name: "sync.grants.failed",
    metric_type: MetricType::Counter,
    description: "Number of access grant attempts that failed",
};

pub const ALL_METRICS: &[MetricDef] = &[
    WEBHOOK_REQUESTS,
    WEBHOOK_RATE_LIMITED,
    WEBHOOK_UNAUTHORIZED,
    SYNC_PASSES,
    SYNC_REPROCESS_PASSES,
    SYNC_PASS_DURATION,
    GRANTS_SUCCESSFUL,
    GRANTS_SKIPPED,
    GRANTS_FAILED,
];

/// Register descriptions with the installed metrics recorder.
pub fn describe_all() {
    for def in ALL_METRICS {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}
