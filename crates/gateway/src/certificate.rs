use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::GatewayError;

/// PEM client credential (certificate chain and private key) identifying
/// which app a notification is sent for.
///
/// Formatting never prints key material, only a short fingerprint.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Certificate(Arc<str>);

impl Certificate {
    pub fn new(pem: impl Into<Arc<str>>) -> Self {
        Self(pem.into())
    }

    pub fn as_pem(&self) -> &str {
        &self.0
    }

    /// Short identifier for log output. Consistent within one process only;
    /// the hash is not guaranteed to match across builds, so never persist it.
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.0.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Parse the PEM into a certificate chain and private key.
    pub fn credentials(
        &self,
    ) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), GatewayError> {
        let chain = rustls_pemfile::certs(&mut self.0.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GatewayError::Certificate(format!("unreadable certificate: {e}")))?;
        if chain.is_empty() {
            return Err(GatewayError::Certificate(
                "no certificate found in PEM".to_string(),
            ));
        }

        let key = rustls_pemfile::private_key(&mut self.0.as_bytes())
            .map_err(|e| GatewayError::Certificate(format!("unreadable private key: {e}")))?
            .ok_or_else(|| GatewayError::Certificate("no private key found in PEM".to_string()))?;

        Ok((chain, key))
    }
}

impl From<&str> for Certificate {
    fn from(pem: &str) -> Self {
        Self::new(pem)
    }
}

impl From<String> for Certificate {
    fn from(pem: String) -> Self {
        Self::new(pem)
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Certificate({})", self.fingerprint())
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}
