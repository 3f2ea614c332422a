/// Metrics for Gatehouse
///
/// Prometheus counters for authentication outcomes and issued tokens,
/// exposed at `/metrics` in the text exposition format.
use crate::error::{GateError, GateResult};
use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

lazy_static! {
    /// Authentication attempts by flow (password, oidc, wallet, refresh) and outcome
    pub static ref AUTH_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "auth_attempts_total",
        "Total number of authentication attempts",
        &["flow", "outcome"]
    )
    .unwrap();

    /// Tokens issued by kind (access, refresh)
    pub static ref TOKENS_ISSUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tokens_issued_total",
        "Total number of tokens issued",
        &["kind"]
    )
    .unwrap();
}

/// Authentication flows
pub mod flow {
    pub const REGISTER: &str = "register";
    pub const PASSWORD: &str = "password";
    pub const OIDC: &str = "oidc";
    pub const WALLET: &str = "wallet";
    pub const REFRESH: &str = "refresh";
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> GateResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| GateError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| GateError::Internal(format!("Metrics not UTF-8: {}", e)))
}

/// Record the outcome of an authentication attempt
pub fn record_auth_attempt<T>(flow: &str, result: &GateResult<T>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(GateError::Database(_) | GateError::Internal(_) | GateError::Io(_)) => "error",
        Err(_) => "rejected",
    };
    AUTH_ATTEMPTS_TOTAL.with_label_values(&[flow, outcome]).inc();
}

/// Record an issued access token
pub fn record_access_token() {
    TOKENS_ISSUED_TOTAL.with_label_values(&["access"]).inc();
}

/// Record an issued access and refresh token pair
pub fn record_token_pair() {
    TOKENS_ISSUED_TOTAL.with_label_values(&["access"]).inc();
    TOKENS_ISSUED_TOTAL.with_label_values(&["refresh"]).inc();
}
