//! Relay metrics for observability.
//!
//! Uses the global OpenTelemetry meter provider, which must be installed by
//! the host application. Without one every instrument is a no-op.

use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("natter-relay"))
}

// ============================================================================
// Counters (Cumulative)
// ============================================================================

/// Counter for chat messages handled by the router.
pub fn messages_routed() -> Counter<u64> {
    meter()
        .u64_counter("natter.messages.routed")
        .with_description("Total chat messages handled by the router")
        .with_unit("message")
        .build()
}

/// Counter for authentication attempts.
pub fn auth_attempts() -> Counter<u64> {
    meter()
        .u64_counter("natter.auth.attempts")
        .with_description("Total login attempts")
        .with_unit("attempt")
        .build()
}

/// Counter for terminated sessions.
pub fn sessions_terminated() -> Counter<u64> {
    meter()
        .u64_counter("natter.sessions.terminated")
        .with_description("Total sessions terminated")
        .with_unit("session")
        .build()
}

// ============================================================================
// Gauges (Current State)
// ============================================================================

/// Gauge for registered sessions.
pub fn sessions_active() -> Gauge<i64> {
    meter()
        .i64_gauge("natter.sessions.active")
        .with_description("Current number of registered sessions")
        .with_unit("session")
        .build()
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record a routed message. `outcome` is `delivered`, `not_found` or
/// `recipient_gone`.
pub fn record_message_routed(outcome: &'static str) {
    messages_routed().add(1, &[KeyValue::new("outcome", outcome)]);
}

/// Record a login attempt.
pub fn record_auth_attempt(success: bool) {
    auth_attempts().add(1, &[KeyValue::new("success", success)]);
}

/// Record a session termination. `reason` is `disconnect`, `protocol`,
/// `transport`, `shutdown` or `internal`.
pub fn record_session_terminated(reason: &'static str) {
    sessions_terminated().add(1, &[KeyValue::new("reason", reason)]);
}

/// Record the current number of registered sessions.
pub fn record_sessions_active(count: usize) {
    sessions_active().record(i64::try_from(count).unwrap_or(i64::MAX), &[]);
}
