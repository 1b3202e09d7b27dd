//! Client-facing error taxonomy.
//!
//! Relocation and lease errors are recovered inside the scan driver and
//! never reach the caller unless retries run out. A scan surfaces at most
//! one terminal error from `next()`; rows delivered before it remain valid.

use thiserror::Error;

use lattice_rpc::TabletError;

#[derive(Debug, Error)]
pub enum ScanError {
    /// The descriptor could not describe a servable scan or get. Raised at
    /// construction, never at fetch time.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
    /// The bounded retry budget ran out; the scan is unusable afterwards.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: TabletError },
    /// The scan was used after being closed.
    #[error("scanner is closed")]
    Closed,
}

/// Failures of the pass-through admin client.
#[derive(Debug, Error)]
pub enum AdminError {
    /// The server rejected the operation; its message is passed through.
    #[error("remote admin call failed: {0}")]
    Remote(String),
    /// The request never completed a round trip.
    #[error("admin transport failure: {0}")]
    Transport(String),
    /// The response could not be decoded.
    #[error("malformed admin response: {0}")]
    Protocol(String),
    /// The server answered with the wrong response shape for the request.
    #[error("unexpected admin response for {0}")]
    UnexpectedResponse(&'static str),
}
