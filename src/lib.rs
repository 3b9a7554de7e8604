//! Courier - authenticated upstream fetch-and-fan-out
//!
//! Builds signed HTTP requests from per-request context (resolved node,
//! auth parameters), executes them, and delivers the selected part of the
//! response downstream.
//!
//! ## Architecture
//!
//! ```text
//! ContextStore ──(node, auth)──▶ RequestJob::build ──▶ Upstream
//!                                                        │
//!                       DownstreamSink ◀── body ─── RouteHandler
//!                       Encoder        ◀── header ──┘
//! ```

pub mod config;
pub mod job;
pub mod logging;
pub mod pipe;
pub mod signing;
pub mod types;
pub mod worker;

pub use config::Args;
pub use job::{Delivery, JobSpec, JobState, OutputRoute, RequestJob};
pub use pipe::{ContextStore, ContextValue, Pipe};
pub use signing::{AuthParams, SignedAuth, Signer};
pub use types::{CourierError, Result};
pub use worker::{Job, WorkerPool};
