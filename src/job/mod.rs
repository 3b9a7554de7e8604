//! Request jobs
//!
//! A [`RequestJob`] is built from a [`JobSpec`] against a request context,
//! sends one authenticated upstream request, and routes the part of the
//! response named by its [`OutputRoute`] to a downstream sink or encoder.

pub mod node;
pub mod replacer;
pub mod request;
pub mod route;
pub mod sink;
pub mod upstream;

pub use node::ResolvedNode;
pub use replacer::{PlaceholderReplacer, Replacer};
pub use request::{prepare_request, CancelFn, Delivery, JobSpec, JobState, RequestJob};
pub use route::{Chunk, ChunkHandler, Finalizer, OutputRoute, RouteHandler, BODY_KEY};
pub use sink::{merge_headers, BufferedSink, DownstreamSink, Encoder, JsonLinesEncoder, WriterSink};
pub use upstream::{ClientConfig, HttpUpstream, Upstream};
