//! Cross-boundary single-value pipe
//!
//! Hands a value produced by one task (typically the resolved node for a
//! request, serialized as JSON) to consumers that run later or concurrently.
//!
//! - [`channel`] creates a [`PipeWriter`] / [`Pipe`] pair
//! - the first read drains the producer side into an immutable buffer
//! - [`Pipe::rewind`] replays the buffer from the start
//! - [`ContextStore`] holds pipes and other typed values under string keys
//! - [`extract`] copies a stored pipe into a destination within a time budget

pub mod buffer;
pub mod context;
pub mod extract;

pub use buffer::{channel, Pipe, PipeWriter};
pub use context::{keys, ContextStore, ContextValue, SharedBuffer, SharedPipe};
pub use extract::{extract, extract_json, EXTRACTION_TIMEOUT};
