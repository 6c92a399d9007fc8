//! Error types for the icnfwd forwarder.

use thiserror::Error;

/// All possible errors that can occur within the forwarder.
#[derive(Error, Debug)]
pub enum Error {
    /// Unparseable packet or control line. Dropped silently by the
    /// processor, counted per connection.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// A table or pool refused to grow. The packet is dropped, the
    /// connection stays up.
    #[error("resource exhausted: {0}")]
    Exhausted(String),

    /// Forwarding denied by policy (hop limit, missing route).
    #[error("policy denied: {0}")]
    Denied(String),

    /// The remote side closed the connection.
    #[error("peer closed connection")]
    PeerClosed,

    /// Bad configuration (CLI flag, config file line, control verb).
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}
