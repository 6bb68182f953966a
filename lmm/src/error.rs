/// Errors from the LMM provider layer.
///
/// The distinction between variants drives control flow elsewhere: only
/// `Transient` errors are retried and counted by the circuit breaker; `Parse`
/// errors end the current item without touching breaker state.
#[derive(Debug, thiserror::Error)]
pub enum LmmError {
    /// Connection-level failure or a retryable HTTP status (429, 5xx).
    #[error("{provider} transient error: {message}")]
    Transient {
        provider: &'static str,
        message: String,
    },

    /// Non-retryable HTTP failure (auth, bad request, unknown model).
    #[error("{provider} API error (status {status}): {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    /// The model's output did not validate as a step response.
    #[error("failed to parse {provider} response: {message}")]
    Parse {
        provider: &'static str,
        message: String,
        raw_output: String,
    },

    #[error("circuit breaker open for {provider}, retry in {cooldown_remaining:.1}s")]
    CircuitOpen {
        provider: &'static str,
        cooldown_remaining: f64,
    },

    /// The provider reported no token usage; cost tracking would silently
    /// break, so the call fails instead.
    #[error("{provider} response is missing token usage")]
    MissingUsage { provider: &'static str },

    /// An outgoing image payload could not be decoded for cost accounting.
    #[error("invalid image payload: {0}")]
    InvalidPayload(String),

    #[error("{0}")]
    Config(String),
}

impl LmmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LmmError::Transient { .. })
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, LmmError::Parse { .. })
    }
}
