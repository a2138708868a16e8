//! TLS termination for `wss://` listeners.
//!
//! Handshakes run on their own tasks, so a slow client never holds up the
//! accept loop. Connections that finish the handshake are handed to axum
//! through [`TlsListener`].

use domain_avail_lib::{DomainAvailError, TlsFiles};
use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

/// Upper bound on a single TLS handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshaken connections waiting for axum to pick them up.
const ACCEPT_BACKLOG: usize = 64;

/// Build an acceptor from a PEM certificate chain and private key.
pub fn load_acceptor(files: &TlsFiles) -> Result<TlsAcceptor, DomainAvailError> {
    let certs = load_certs(&files.cert)?;
    let key = load_key(&files.key)?;

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| DomainAvailError::config(format!("TLS setup failed: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| DomainAvailError::config(format!("Invalid TLS certificate or key: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open(path: &Path) -> Result<BufReader<File>, DomainAvailError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| DomainAvailError::file_error(path.to_string_lossy(), e.to_string()))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, DomainAvailError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DomainAvailError::file_error(path.to_string_lossy(), format!("Invalid PEM: {}", e)))?;

    if certs.is_empty() {
        return Err(DomainAvailError::file_error(
            path.to_string_lossy(),
            "No certificates found",
        ));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, DomainAvailError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| DomainAvailError::file_error(path.to_string_lossy(), format!("Invalid PEM: {}", e)))?
        .ok_or_else(|| DomainAvailError::file_error(path.to_string_lossy(), "No private key found"))
}

/// A TCP listener that only yields connections which completed a TLS handshake.
pub struct TlsListener {
    local_addr: SocketAddr,
    ready: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
}

impl TlsListener {
    /// Start accepting on `listener`. Must be called inside a tokio runtime.
    pub fn new(listener: TcpListener, acceptor: TlsAcceptor) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let (tx, ready) = mpsc::channel(ACCEPT_BACKLOG);
        tokio::spawn(accept_loop(listener, acceptor, tx));
        Ok(Self { local_addr, ready })
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    tx: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
) {
    while !tx.is_closed() {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                // Usually fd exhaustion; back off instead of spinning
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(tls)) => {
                    let _ = tx.send((tls, peer)).await;
                }
                Ok(Err(e)) => debug!(%peer, error = %e, "TLS handshake failed"),
                Err(_) => debug!(%peer, "TLS handshake timed out"),
            }
        });
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.ready.recv().await {
            Some(conn) => conn,
            // The accept loop only stops once this receiver is gone
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};
    use tokio_rustls::TlsConnector;

    fn testdata(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata").join(name)
    }

    fn localhost_files() -> TlsFiles {
        TlsFiles {
            cert: testdata("localhost.crt"),
            key: testdata("localhost.key"),
        }
    }

    #[test]
    fn test_load_acceptor_from_pem_files() {
        assert!(load_acceptor(&localhost_files()).is_ok());
    }

    #[test]
    fn test_missing_files_are_file_errors() {
        let files = TlsFiles {
            cert: PathBuf::from("/nonexistent/cert.pem"),
            key: testdata("localhost.key"),
        };
        assert!(matches!(
            load_acceptor(&files),
            Err(DomainAvailError::FileError { .. })
        ));
    }

    #[test]
    fn test_pem_without_expected_blocks_is_rejected() {
        let mut empty = NamedTempFile::new().unwrap();
        empty.write_all(b"not a pem file\n").unwrap();
        empty.flush().unwrap();

        let no_certs = TlsFiles {
            cert: empty.path().to_path_buf(),
            key: testdata("localhost.key"),
        };
        assert!(load_acceptor(&no_certs).is_err());

        // A certificate file holds no private key
        let no_key = TlsFiles {
            cert: testdata("localhost.crt"),
            key: testdata("localhost.crt"),
        };
        assert!(load_acceptor(&no_key).is_err());
    }

    #[tokio::test]
    async fn test_serves_http_over_tls() {
        let acceptor = load_acceptor(&localhost_files()).unwrap();
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let listener = TlsListener::new(tcp, acceptor).unwrap();
        let app = Router::new().fallback(|| async { "secure" });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut roots = RootCertStore::empty();
        for cert in load_certs(&testdata("localhost.crt")).unwrap() {
            roots.add(cert).unwrap();
        }
        let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let stream = TcpStream::connect(addr).await.unwrap();
        let server_name = ServerName::try_from("localhost").unwrap();
        let mut tls = connector.connect(server_name, stream).await.unwrap();

        tls.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        tls.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);

        assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {}", response);
        assert!(response.ends_with("secure"));
    }
}
