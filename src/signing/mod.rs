//! Shared-secret request signing
//!
//! The upstream file-access service authenticates directive requests by a
//! nonce + keyed MAC pair carried in the query string:
//!
//! ```text
//! GET /api/{repo}/download/{nodename}?auth_token=<nonce>&auth_hash=<mac>&key=<app key>
//!
//! mac = hex(HMAC-SHA256(app_secret, "<nonce>:<path>"))
//! ```
//!
//! The MAC covers the exact path that goes on the wire, so placeholder
//! rewriting must be finished before a request is signed.

pub mod signer;

pub use signer::{AuthParams, SignedAuth, Signer};
