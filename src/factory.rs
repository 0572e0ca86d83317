use std::fmt;
use std::sync::Arc;

use crate::net::{
    BoxConnection, DynamicTlsConnection, RawConnection, SessionConnection, TlsBackend,
    TlsStreamConnection,
};
use crate::options::ContextOptions;
use crate::tls::{TlsContext, TlsError, TlsMaterial};

/// Produces connections sharing one configuration.
///
/// All the fallible setup happens when the factory is built; creating a
/// connection never fails.
pub trait ConnectionFactory: Send + Sync {
    fn create_connection(&self) -> BoxConnection;
}

/// Factory for plaintext connections.
#[derive(Debug, Default)]
pub struct RawConnectionFactory;

impl RawConnectionFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ConnectionFactory for RawConnectionFactory {
    fn create_connection(&self) -> BoxConnection {
        Box::new(RawConnection::new())
    }
}

/// Factory for stream-delegated TLS connections.
///
/// The TLS context is built once and shared read-only by every
/// connection the factory produces.
pub struct TlsStreamFactory {
    ctx: Arc<TlsContext>,
}

impl TlsStreamFactory {
    pub fn new_client(material: TlsMaterial, domain: impl Into<String>) -> Result<Self, TlsError> {
        Ok(Self {
            ctx: Arc::new(TlsContext::client(material, domain)?),
        })
    }

    pub fn new_server(material: TlsMaterial) -> Result<Self, TlsError> {
        Ok(Self {
            ctx: Arc::new(TlsContext::server(material)?),
        })
    }

    pub fn context(&self) -> &Arc<TlsContext> {
        &self.ctx
    }

    pub fn options(&self) -> &ContextOptions {
        self.ctx.options()
    }

    /// Connection that starts in plaintext and upgrades into this
    /// factory's TLS configuration on demand.
    pub fn create_starttls_connection(&self) -> DynamicTlsConnection {
        DynamicTlsConnection::new(self.ctx.clone(), TlsBackend::Stream)
    }
}

impl ConnectionFactory for TlsStreamFactory {
    fn create_connection(&self) -> BoxConnection {
        Box::new(TlsStreamConnection::new(self.ctx.clone()))
    }
}

impl fmt::Debug for TlsStreamFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsStreamFactory")
            .field("ctx", &self.ctx)
            .finish()
    }
}

/// Factory for state-machine TLS connections.
pub struct TlsSessionFactory {
    ctx: Arc<TlsContext>,
}

impl TlsSessionFactory {
    pub fn new_client(material: TlsMaterial, domain: impl Into<String>) -> Result<Self, TlsError> {
        Ok(Self {
            ctx: Arc::new(TlsContext::client(material, domain)?),
        })
    }

    pub fn new_server(material: TlsMaterial) -> Result<Self, TlsError> {
        Ok(Self {
            ctx: Arc::new(TlsContext::server(material)?),
        })
    }

    pub fn context(&self) -> &Arc<TlsContext> {
        &self.ctx
    }

    pub fn options(&self) -> &ContextOptions {
        self.ctx.options()
    }

    pub fn create_starttls_connection(&self) -> DynamicTlsConnection {
        DynamicTlsConnection::new(self.ctx.clone(), TlsBackend::Session)
    }
}

impl ConnectionFactory for TlsSessionFactory {
    fn create_connection(&self) -> BoxConnection {
        Box::new(SessionConnection::new(self.ctx.clone()))
    }
}

impl fmt::Debug for TlsSessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSessionFactory")
            .field("ctx", &self.ctx)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use crate::tls::{TlsError, TlsMaterial};

    use super::{ConnectionFactory, RawConnectionFactory, TlsStreamFactory};

    #[test]
    fn test_raw_factory() {
        let factory = RawConnectionFactory::new();
        let conn = factory.create_connection();
        assert!(!conn.options().tls_active);
    }

    #[test]
    fn test_unsupported_version_makes_factory_unusable() {
        let material = TlsMaterial::new().with_tls_versions("TLSv1.0");
        let err = TlsStreamFactory::new_client(material, "localhost").unwrap_err();
        assert!(matches!(err, TlsError::UnsupportedVersion(_)));
    }

    #[test]
    fn test_factory_is_debuggable() {
        let material = TlsMaterial::new().with_verify_mode(crate::options::VerifyMode::None);
        let factory = TlsStreamFactory::new_client(material, "localhost").expect("factory");
        assert!(format!("{:?}", factory).contains("TlsStreamFactory"));
    }
}
