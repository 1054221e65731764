//! # egd-core
//!
//! Core library of the EGD entropy gathering daemon: a bounded, chunked,
//! atomically persistable entropy pool fed by configurable low-entropy
//! sources (network URLs, local files, external commands, embedded
//! scripts).
//!
//! ## Pipeline
//!
//! ```text
//! Source -> fetch -> [compress] -> stir -> scale -> deposit -> Pool
//! ```
//!
//! Each cycle fetches one raw sample, optionally compresses it (LZ4),
//! distills it with the sliding-window SHA-256 stirring transform, scales
//! it by the operator's entropy estimate and deposits the result into the
//! pool, which silently truncates at its byte ceiling.
//!
//! The daemon loop, control server and lock file live in `egd-daemon`;
//! this crate holds everything both the daemon and the command-line
//! client need: the data model, the acquisition backends, the
//! configuration surface and the control wire types.

pub mod chunk;
pub mod clock;
pub mod compress;
pub mod config;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod source;
pub mod sources;
pub mod stir;

pub use chunk::PoolChunk;
pub use config::{Config, CustomValue, LogLevel, SourceSpec, DISABLE_THRESHOLD};
pub use error::{Component, EgdError, ErrorCategory};
pub use pool::{EntropyPool, PoolSnapshot, PoolStats};
pub use protocol::{Request, Response};
pub use source::{run_cycle, SourcePhase, SourceReport, SourceState};
pub use stir::{stir, BLOCK_SIZE, WINDOW_SIZE};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
