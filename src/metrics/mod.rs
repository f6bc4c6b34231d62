//! Metrics recorded through the `metrics` facade.
//!
//! The library never installs a recorder; without one these calls are no-ops.

/// Metric label values
pub mod labels {
    /// Initialization fulfilled
    pub const OUTCOME_OK: &str = "ok";
    /// Initialization rejected
    pub const OUTCOME_ERROR: &str = "error";
}

/// Counter helpers
pub mod counters {
    /// Record the settled outcome of a credential pipeline run
    pub fn initialization(outcome: &'static str) {
        metrics::counter!("apn_credential_initializations_total", "outcome" => outcome)
            .increment(1);
    }

    /// Record a parse failure that fell back to unparsed data
    pub fn parse_fallback() {
        metrics::counter!("apn_credential_parse_fallbacks_total").increment(1);
    }

    /// Record a `connect()` call
    pub fn connect_attempted() {
        metrics::counter!("apn_connect_attempts_total").increment(1);
    }

    /// Record an established socket
    pub fn connect_succeeded() {
        metrics::counter!("apn_connect_success_total").increment(1);
    }

    /// Record a failed `connect()`, labelled by error category
    pub fn connect_failed(category: &'static str) {
        metrics::counter!("apn_connect_failures_total", "reason" => category).increment(1);
    }
}

/// Histogram helpers
pub mod histograms {
    /// Time from socket construction to the completion callback
    pub fn socket_established(duration_ms: u64) {
        metrics::histogram!("apn_socket_establish_duration_ms").record(duration_ms as f64);
    }
}
