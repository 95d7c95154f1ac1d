use thiserror::Error;

/// Errors raised by the matcher compiler and evaluator (spec §4.2, §6).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatcherError {
    #[error("{start}:{end}: {text}: {reason}")]
    ParseError {
        start: usize,
        end: usize,
        text: String,
        reason: String,
    },

    #[error("invalid label name {0:?}")]
    InvalidLabelName(String),

    #[error("invalid regex {0:?}: {1}")]
    InvalidRegex(String, String),
}

pub type MatcherResult<T> = Result<T, MatcherError>;

/// Errors raised by the alert provider (spec §4.1).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("alert not found")]
    NotFound,

    #[error("too many alerts for alertname {0:?}")]
    TooManyAlerts(String),

    #[error("provider is closed")]
    Closed,
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors raised while running a notification pipeline stage (spec §4.6, §7).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    /// A stage failed in a way that must not be retried (4xx other than 429, auth
    /// misconfiguration, template error). Terminates the chain for this
    /// `(group, receiver)` flush only; other receivers proceed independently.
    #[error("fatal error in stage {stage}: {reason}")]
    Fatal { stage: &'static str, reason: String },

    /// Retry budget (deadline or cancellation) was exhausted before a transient
    /// error resolved.
    #[error("retry deadline exceeded in stage {stage}: {reason}")]
    DeadlineExceeded { stage: &'static str, reason: String },

    /// The pipeline run was cancelled (shutdown, or group closed mid-flush).
    #[error("pipeline cancelled at stage {stage}")]
    Cancelled { stage: &'static str },
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised by the notification log (spec §4.7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NflogError {
    #[error("serialization error: {0}")]
    CannotSerialize(String),

    #[error("cannot decode gossip payload: {0}")]
    CannotDecode(String),
}

pub type NflogResult<T> = Result<T, NflogError>;

/// Top-level error, used at the service-binary boundary (§6 exit codes) and
/// anywhere call sites need to propagate across module boundaries without
/// flattening to a string. Consumers should match on the wrapped sentinel
/// kinds, never on the rendered message.
#[derive(Debug, Error, Clone)]
pub enum Error {
    #[error(transparent)]
    Matcher(#[from] MatcherError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Nflog(#[from] NflogError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
