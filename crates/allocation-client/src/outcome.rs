use serde_json::Value;
use snafu::Snafu;

/// Body text the endpoint returns when throttling, sometimes with status 200.
pub const RATE_LIMIT_MARKER: &str = "Ratelimit exceeded please try again after";

/// JSON pointer to the object whose presence marks a successful lookup.
pub const TOKENS_EARNED_POINTER: &str = "/data/zoraTokenAllocation/totalTokensEarned";

const TOTAL_TOKENS_FIELD: &str = "totalTokens";

/// Why an address ended without a usable result.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum FailureReason {
    #[snafu(display("GraphQL error: {errors}"))]
    GraphQl { errors: String },

    #[snafu(display("unexpected 200 response structure"))]
    UnexpectedShape,

    #[snafu(display("JSON decode error: {message}"))]
    JsonDecode { message: String },

    #[snafu(display("HTTP status {status}"))]
    HttpStatus { status: u16 },

    #[snafu(display("client error: {message}"))]
    Transport { message: String },

    #[snafu(display("invalid proxy {proxy}: {message}"))]
    InvalidProxy { proxy: String, message: String },

    #[snafu(display("timeout max retries exceeded"))]
    Timeout,

    #[snafu(display("proxy connection error: {message}"))]
    ProxyConnection { message: String },

    #[snafu(display("persistent rate limit max retries exceeded after {rounds} rounds"))]
    PersistentRateLimit { rounds: u32 },

    #[snafu(display("fetch task failed: {message}"))]
    TaskFailed { message: String },

    #[snafu(display("retry loop ended unexpectedly"))]
    RetryLoopExhausted,
}

/// Result of fetching one address.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Parsed body containing the token allocation object.
    Success { address: String, payload: Value },

    /// Upstream throttling. Never retried by the executor itself.
    RateLimited {
        address: String,
        status: u16,
        last_proxy: String,
    },

    PermanentError {
        address: String,
        reason: FailureReason,
        status: Option<u16>,
        last_proxy: String,
    },

    /// Timeout or proxy failure that outlived the local retry budget.
    TransientExhausted {
        address: String,
        reason: FailureReason,
        last_proxy: String,
    },
}

impl FetchOutcome {
    pub fn address(&self) -> &str {
        match self {
            FetchOutcome::Success { address, .. }
            | FetchOutcome::RateLimited { address, .. }
            | FetchOutcome::PermanentError { address, .. }
            | FetchOutcome::TransientExhausted { address, .. } => address,
        }
    }

    /// Everything except `RateLimited` ends the address for its batch.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FetchOutcome::RateLimited { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Snafu)]
pub enum AmountError {
    #[snafu(display("'totalTokensEarned' or 'totalTokens' field missing"))]
    MissingField,

    #[snafu(display("'totalTokens' is null"))]
    NullAmount,

    #[snafu(display("could not convert token amount '{raw}' to a number"))]
    NotNumeric { raw: String },

    #[snafu(display("token amount {value} is not finite"))]
    NotFinite { value: f64 },
}

/// The allocation object, if present and non-null.
pub fn tokens_earned(payload: &Value) -> Option<&Value> {
    payload
        .pointer(TOKENS_EARNED_POINTER)
        .filter(|value| !value.is_null())
}

/// Raw `totalTokens` value for logging; `N/A` when absent.
pub fn token_amount_display(payload: &Value) -> String {
    match tokens_earned(payload).and_then(|earned| earned.get(TOTAL_TOKENS_FIELD)) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "N/A".to_string(),
    }
}

/// Extracts `totalTokens` as a finite number. Accepts numeric strings and
/// JSON numbers.
pub fn parse_token_amount(payload: &Value) -> Result<f64, AmountError> {
    let raw = tokens_earned(payload)
        .and_then(|earned| earned.get(TOTAL_TOKENS_FIELD))
        .ok_or(AmountError::MissingField)?;

    let value = match raw {
        Value::Null => return Err(AmountError::NullAmount),
        Value::Number(n) => n.as_f64().ok_or_else(|| AmountError::NotNumeric {
            raw: n.to_string(),
        })?,
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| AmountError::NotNumeric {
            raw: s.clone(),
        })?,
        other => {
            return Err(AmountError::NotNumeric {
                raw: other.to_string(),
            })
        }
    };

    if value.is_finite() {
        Ok(value)
    } else {
        Err(AmountError::NotFinite { value })
    }
}
