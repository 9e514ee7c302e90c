//! Dialing: produces a connected, optionally TLS-wrapped, duplex byte
//! stream for an origin. Abstracted behind [`Connector`] so the agent's
//! send path is testable against an in-process loopback listener without a
//! real certificate authority.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Kind, Result};
use crate::origin::Origin;

pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Produces a connected socket for an origin. Implementations own DNS
/// resolution, the TCP handshake, and (for `https` origins) the TLS
/// handshake.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, origin: &'a Origin) -> BoxFuture<'a, Result<Box<dyn AsyncStream>>>;
}

/// Dials TCP directly, wrapping with `rustls` for `https` origins and the
/// platform's webpki root store.
pub struct DirectConnector {
    tls_config: Arc<rustls::ClientConfig>,
}

impl DirectConnector {
    pub fn new() -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .expect("ring provider supports the default protocol versions")
        .with_root_certificates(roots)
        .with_no_client_auth();
        DirectConnector {
            tls_config: Arc::new(config),
        }
    }
}

impl Default for DirectConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for DirectConnector {
    fn connect<'a>(&'a self, origin: &'a Origin) -> BoxFuture<'a, Result<Box<dyn AsyncStream>>> {
        Box::pin(async move {
            let addr = format!("{}:{}", origin.host, origin.port);
            let tcp = TcpStream::connect(&addr).await.map_err(Error::from)?;
            let _ = tcp.set_nodelay(true);

            if origin.scheme.is_secure() {
                let server_name = rustls::pki_types::ServerName::try_from(origin.host.clone())
                    .map_err(|e| Error::new(Kind::Io).with(e))?;
                let connector = TlsConnector::from(self.tls_config.clone());
                let tls = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(Error::from)?;
                Ok(Box::new(tls) as Box<dyn AsyncStream>)
            } else {
                Ok(Box::new(tcp) as Box<dyn AsyncStream>)
            }
        })
    }
}
