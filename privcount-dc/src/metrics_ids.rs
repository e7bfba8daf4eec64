//! Metrics keys this process reports.

/// Counts events dropped because a per-counter event cap had already
/// been reached for the round.
pub const METRICS_ID_DC_CAP_OVERFLOW: &str = "privcount.dc.cap_overflow";
/// Counts event-source reconnects, each of which may have missed events.
pub const METRICS_ID_DC_SOURCE_GAP: &str = "privcount.dc.source_gap";
/// Counts events applied to at least one counter.
pub const METRICS_ID_DC_EVENTS_APPLIED: &str = "privcount.dc.events_applied";

/// Describes all metrics this process reports, for metadata-aware
/// exporters.
pub fn describe_metrics() {
    metrics::describe_counter!(
        METRICS_ID_DC_CAP_OVERFLOW,
        metrics::Unit::Count,
        "Events dropped by a per-counter event cap"
    );
    metrics::describe_counter!(
        METRICS_ID_DC_SOURCE_GAP,
        metrics::Unit::Count,
        "Event-source reconnects, each a potential gap in observed events"
    );
    metrics::describe_counter!(
        METRICS_ID_DC_EVENTS_APPLIED,
        metrics::Unit::Count,
        "Events applied to at least one counter"
    );
}
