//! Typed HTTP access to the remote recipe service (Paprika-style v2 API).
//!
//! All endpoints wrap their payload in a `{"result": ...}` envelope; a
//! structured failure arrives as `{"error": {"message": ...}}`. Uploads are
//! multipart POSTs whose `data` part is the gzipped JSON payload.

mod client;
mod error;

pub use client::{DEFAULT_API_BASE, RemoteApi, RemoteClient};
pub use error::RemoteError;
