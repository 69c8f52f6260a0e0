//! Error taxonomy for a regeneration run.
//!
//! Collaborator failures are `GenerationError`, `StoreError`, or `ConfigError`;
//! the pipeline folds them into `PipelineError`, one variant per terminal
//! state. Callers classify with `category()` instead of matching on text.
//!
//! ## Categories
//!
//! | Category               | Raised by                      | Operator action            |
//! |------------------------|--------------------------------|----------------------------|
//! | Precondition           | config, credentials, input     | fix the invocation         |
//! | Transport              | oracle or store unreachable    | re-run later               |
//! | Authentication         | oracle or store rejected token | rotate the credential      |
//! | OracleOutput           | reply had no usable code block | re-author the request      |
//! | ConcurrentModification | stale revision / path exists   | re-fetch and run again     |
//! | StoreRejected          | any other store refusal        | inspect the store response |
//!
//! Nothing here is retried automatically; a run that fails stops.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of a run failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Precondition,
    Transport,
    Authentication,
    OracleOutput,
    ConcurrentModification,
    StoreRejected,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precondition => write!(f, "precondition"),
            Self::Transport => write!(f, "transport"),
            Self::Authentication => write!(f, "authentication"),
            Self::OracleOutput => write!(f, "oracle_output"),
            Self::ConcurrentModification => write!(f, "concurrent_modification"),
            Self::StoreRejected => write!(f, "store_rejected"),
        }
    }
}

/// Failure to obtain a usable sketch from the code-generation oracle.
///
/// Any of these aborts the run before the store is written.
#[derive(Debug, Error)]
pub enum GenerationError {
    // ── Oracle call ───────────────────────────────────────────────────────
    /// Connection refused, DNS failure, reset mid-response.
    #[error("Oracle unreachable: {0}")]
    Unreachable(String),

    /// The call did not complete within the configured bound.
    #[error("Oracle call timed out after {0}s")]
    Timeout(u64),

    /// The oracle refused the access token.
    #[error("Oracle rejected credentials (HTTP {0})")]
    Authentication(u16),

    /// Any other non-success status.
    #[error("Oracle returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The response body was not a completion document.
    #[error("Malformed oracle response: {0}")]
    MalformedResponse(String),

    /// A completion arrived but carried no text.
    #[error("Oracle returned an empty completion")]
    EmptyResponse,

    // ── Reply content ─────────────────────────────────────────────────────
    /// The reply contains no fenced code block.
    #[error("No fenced code block found in oracle reply")]
    NoCodeBlock,

    /// An opening fence was never closed (usually a truncated reply).
    #[error("Code block opened at line {0} is never closed")]
    UnterminatedCodeBlock(usize),

    /// The reply contains more than one fenced block.
    #[error("Expected exactly one code block, found {0}")]
    MultipleCodeBlocks(usize),

    /// The single fenced block has no code in it.
    #[error("Code block is empty")]
    EmptyCodeBlock,

    /// Backtick fences survived extraction.
    #[error("Extracted code still contains a ``` fence sequence")]
    ResidualFence,
}

impl GenerationError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unreachable(_) | Self::Timeout(_) | Self::Rejected { .. } => {
                ErrorCategory::Transport
            }
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::MalformedResponse(_)
            | Self::EmptyResponse
            | Self::NoCodeBlock
            | Self::UnterminatedCodeBlock(_)
            | Self::MultipleCodeBlocks(_)
            | Self::EmptyCodeBlock
            | Self::ResidualFence => ErrorCategory::OracleOutput,
        }
    }

    /// `true` when the oracle could not be reached or answered with an
    /// HTTP-level failure, as opposed to answering with unusable content.
    pub fn is_transport(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport | ErrorCategory::Authentication
        )
    }
}

/// Failure talking to the source-hosting store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Conditional update refused: the revision token is stale.
    #[error("Conflict updating {path}: revision {expected} is no longer current")]
    Conflict { path: String, expected: String },

    /// Create refused: something already exists at the path.
    #[error("Cannot create {path}: it already exists")]
    AlreadyExists { path: String },

    /// The store refused the access token.
    #[error("Store rejected credentials (HTTP {0})")]
    Unauthorized(u16),

    /// The call did not complete within the configured bound.
    #[error("Store call timed out after {0}s")]
    Timeout(u64),

    /// Connection-level failure.
    #[error("Store unreachable: {0}")]
    Transport(String),

    /// Any other non-success status.
    #[error("Store returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The stored document could not be decoded as UTF-8 text.
    #[error("Cannot decode stored document: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Conflict { .. } | Self::AlreadyExists { .. } => {
                ErrorCategory::ConcurrentModification
            }
            Self::Unauthorized(_) => ErrorCategory::Authentication,
            Self::Timeout(_) | Self::Transport(_) => ErrorCategory::Transport,
            Self::Rejected { .. } | Self::Decode(_) => ErrorCategory::StoreRejected,
        }
    }

    /// `true` when another writer got to the document first.
    pub fn is_concurrent_modification(&self) -> bool {
        self.category() == ErrorCategory::ConcurrentModification
    }
}

/// Invalid configuration or missing credentials.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Precondition
    }
}

/// Why a run stopped without publishing.
///
/// Each variant is a terminal state of the pipeline; none is retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The change request was empty. Nothing was fetched or generated.
    #[error("No change requested")]
    NoInput,

    /// The oracle call or code extraction failed. Nothing was written.
    #[error("Generation failed: {0}")]
    GenerationFailed(#[from] GenerationError),

    /// Another writer changed the document between fetch and publish.
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(StoreError),

    /// The store failed for a reason other than a conflict.
    #[error("Store failure: {0}")]
    StoreFailure(StoreError),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        if err.is_concurrent_modification() {
            Self::ConcurrentModification(err)
        } else {
            Self::StoreFailure(err)
        }
    }
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoInput => ErrorCategory::Precondition,
            Self::GenerationFailed(e) => e.category(),
            Self::ConcurrentModification(e) | Self::StoreFailure(e) => e.category(),
        }
    }

    /// Name of the terminal state, for logs and reports.
    pub fn terminal_state(&self) -> &'static str {
        match self {
            Self::NoInput => "aborted_no_input",
            Self::GenerationFailed(_) => "aborted_generation_failed",
            Self::ConcurrentModification(_) => "aborted_concurrent_modification",
            Self::StoreFailure(_) => "aborted_store_failure",
        }
    }

    /// Process exit code the CLI reports for this state.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoInput => 2,
            Self::GenerationFailed(_) => 3,
            Self::ConcurrentModification(_) => 4,
            Self::StoreFailure(_) => 5,
        }
    }
}
