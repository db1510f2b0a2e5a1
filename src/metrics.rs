//! Metrics instrumentation for fksd.
//!
//! All metrics are prefixed with `fksd.`

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use std::time::Instant;

/// Register descriptions with the installed recorder.
pub fn describe() {
    describe_counter!("fksd.query.count", "Queries answered, by type and result");
    describe_histogram!(
        "fksd.query.duration.seconds",
        Unit::Seconds,
        "Time spent matching a query"
    );
    describe_counter!(
        "fksd.control.command.count",
        "Control commands, by subsystem, verb and outcome"
    );
    describe_counter!(
        "fksd.control.rejected.count",
        "Control requests refused before any command ran"
    );
    describe_counter!("fksd.zone.load.count", "Zone load attempts");
    describe_histogram!(
        "fksd.zone.load.duration.seconds",
        Unit::Seconds,
        "Time spent loading a zone"
    );
    describe_gauge!("fksd.state.zones.count", "Loaded zones");
    describe_gauge!("fksd.state.nodes.count", "Nodes across loaded zones");
    describe_gauge!("fksd.state.generation", "Registry mutation counter");
    describe_gauge!("fksd.state.users.count", "Identities with a secret");
    describe_counter!(
        "fksd.request.undecodable.count",
        "Requests dropped because they did not decode"
    );
}

/// Record a resolved query.
pub fn record_query(record_type: &str, result: QueryResult, duration: std::time::Duration) {
    counter!("fksd.query.count", "type" => record_type.to_string(), "result" => result.as_str())
        .increment(1);
    histogram!("fksd.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// How the matching algorithm answered a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    /// Exact match with data of the requested type.
    Answer,
    /// Answered from a wildcard owner.
    Wildcard,
    /// Alias record returned in place of the requested type.
    Alias,
    /// Name exists, type does not.
    NoData,
    /// Delegation to another authority.
    Referral,
    /// Name does not exist.
    NxDomain,
    /// Query shape not supported (ANY).
    ServFail,
    /// Request cannot be bound to a zone (no question or unserved class).
    FormErr,
}

impl QueryResult {
    /// Label value used on metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            QueryResult::Answer => "answer",
            QueryResult::Wildcard => "wildcard",
            QueryResult::Alias => "alias",
            QueryResult::NoData => "nodata",
            QueryResult::Referral => "referral",
            QueryResult::NxDomain => "nxdomain",
            QueryResult::ServFail => "servfail",
            QueryResult::FormErr => "formerr",
        }
    }
}

/// Record a processed control command.
pub fn record_control_command(subsystem: &str, verb: &str, outcome: ControlOutcome) {
    let outcome_str = match outcome {
        ControlOutcome::Applied => "applied",
        ControlOutcome::Skipped => "skipped",
        ControlOutcome::Failed => "failed",
    };

    counter!(
        "fksd.control.command.count",
        "subsystem" => subsystem.to_string(),
        "verb" => verb.to_string(),
        "outcome" => outcome_str
    )
    .increment(1);
}

/// Control command outcome.
#[derive(Debug, Clone, Copy)]
pub enum ControlOutcome {
    /// Command executed.
    Applied,
    /// Malformed text, silently ignored.
    Skipped,
    /// Command failed; request answered with FORMERR.
    Failed,
}

/// Record a rejected control request (bad or missing signature, wrong shape).
pub fn record_control_rejected(reason: &'static str) {
    counter!("fksd.control.rejected.count", "reason" => reason).increment(1);
}

/// Record a zone load attempt.
pub fn record_zone_load(kind: &'static str, ok: bool, duration: std::time::Duration) {
    let result = if ok { "ok" } else { "error" };
    counter!("fksd.zone.load.count", "kind" => kind, "result" => result).increment(1);
    histogram!("fksd.zone.load.duration.seconds", "kind" => kind).record(duration.as_secs_f64());
}

/// Record registry sizes.
pub fn record_zone_counts(zones: usize, nodes: usize) {
    gauge!("fksd.state.zones.count").set(zones as f64);
    gauge!("fksd.state.nodes.count").set(nodes as f64);
}

/// Record the registry mutation counter.
pub fn record_generation(generation: u64) {
    gauge!("fksd.state.generation").set(generation as f64);
}

/// Record the number of known users.
pub fn record_user_count(users: usize) {
    gauge!("fksd.state.users.count").set(users as f64);
}

/// Record a datagram or stream message that could not be decoded.
pub fn record_undecodable(transport: &'static str) {
    counter!("fksd.request.undecodable.count", "transport" => transport).increment(1);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
