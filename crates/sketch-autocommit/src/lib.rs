//! Regenerates a single microcontroller sketch through a code-generation
//! model and publishes it back to its repository with a fresh version marker.
//!
//! | Module       | Purpose                                              |
//! |--------------|------------------------------------------------------|
//! | `stamper`    | `FW_VERSION` marker rewrite / insertion              |
//! | `prompts`    | hardware contract and change-request payloads        |
//! | `fence`      | fenced code block extraction                         |
//! | `generation` | oracle seam, OpenAI-compatible client, extraction    |
//! | `store`      | versioned document store seam, GitHub and in-memory  |
//! | `pipeline`   | fetch → generate → stamp → publish                   |
//! | `config`     | run configuration and credentials                    |
//! | `errors`     | error taxonomy and terminal states                   |

pub mod config;
pub mod errors;
pub mod fence;
pub mod generation;
pub mod pipeline;
pub mod prompts;
pub mod stamper;
pub mod store;

pub use config::{Credentials, PipelineConfig};
pub use errors::{ConfigError, ErrorCategory, GenerationError, PipelineError, StoreError};
pub use generation::{CompletionOracle, GenerationClient, OpenAiOracle};
pub use pipeline::{PreparedRun, PublishAction, PublishPipeline, PublishResult};
pub use store::{CommitInfo, GitHubStore, MemoryStore, RevisionToken, SourceStore, StoredSource};
