use thiserror::Error;

/// Errors raised by a gateway connection.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unable to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid certificate: {0}")]
    Certificate(String),

    #[error("connection is not open")]
    NotConnected,

    #[error("write to gateway failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("read from gateway failed: {0}")]
    Read(#[source] std::io::Error),
}

impl GatewayError {
    /// Transport failures, as opposed to a certificate that can never work.
    pub fn is_connectivity(&self) -> bool {
        !matches!(self, GatewayError::Certificate(_))
    }
}
