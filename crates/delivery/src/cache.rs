//! Per-worker gateway connections, keyed by certificate.
//!
//! A cache belongs to exactly one worker and is never shared, so it needs no
//! locking.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use pushgate_gateway::{Certificate, Connector, GatewayConnection, GatewayError};

pub struct ConnectionCache<C: Connector> {
    worker: String,
    connector: Arc<C>,
    default_certificate: Certificate,
    connections: HashMap<Certificate, C::Connection>,
}

impl<C: Connector> ConnectionCache<C> {
    pub fn new(
        worker: impl Into<String>,
        connector: Arc<C>,
        default_certificate: Certificate,
    ) -> Self {
        Self {
            worker: worker.into(),
            connector,
            default_certificate,
            connections: HashMap::new(),
        }
    }

    /// Certificate a notification is sent with; `None` selects the default.
    pub fn resolve(&self, certificate: Option<&str>) -> Certificate {
        certificate
            .map(Certificate::from)
            .unwrap_or_else(|| self.default_certificate.clone())
    }

    /// Return the open connection for `certificate`, building and connecting
    /// it on first use. A connection that fails to connect is not cached.
    pub async fn connection_for(
        &mut self,
        certificate: Option<&str>,
    ) -> Result<&mut C::Connection, GatewayError> {
        let certificate = self.resolve(certificate);

        match self.connections.entry(certificate) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let mut connection = self.connector.build(&self.worker, entry.key())?;
                connection.connect().await?;
                tracing::debug!(
                    worker = %self.worker,
                    certificate = %entry.key(),
                    "Cached new gateway connection"
                );
                Ok(entry.insert(connection))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close and forget every cached connection.
    pub async fn close_all(&mut self) {
        for (_, mut connection) in self.connections.drain() {
            connection.close().await;
        }
    }
}
