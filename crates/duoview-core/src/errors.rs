use thiserror::Error;

// MARK: - TransportError

/// Errors surfaced by the datagram receive path.
///
/// `Timeout` is the only recoverable variant: it means no datagram arrived
/// within the configured window and the caller may simply call again. Bind
/// and socket IO failures are fatal to the affected operation and are not
/// retried internally.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Bind failed on port {port}: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// True for conditions the caller is expected to retry through.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
