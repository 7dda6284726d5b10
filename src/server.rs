use crate::CertificateManager;
use anyhow::{anyhow, Context};
use rustls::crypto::aws_lc_rs::sign::any_supported_type;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// rustls certificate resolver backed by the manager's in-memory map.
/// `start` has already provisioned every known host, so resolution never
/// waits on the network; unknown hosts abort the handshake.
pub struct ManagerCertResolver {
    manager: Arc<CertificateManager>,
}

impl ManagerCertResolver {
    pub fn new(manager: Arc<CertificateManager>) -> Self {
        Self { manager }
    }

    fn certified_key(&self, server_name: &str) -> anyhow::Result<Arc<CertifiedKey>> {
        let bundle = self
            .manager
            .cached_certificate(server_name)
            .ok_or_else(|| anyhow!("no certificate available for {server_name}"))?;
        let chain = bundle
            .chain()
            .iter()
            .map(|der| CertificateDer::from(der.clone()))
            .collect();
        let key_der = PrivateKeyDer::from(PrivatePkcs1KeyDer::from(
            bundle.private_key().to_pkcs1_der()?,
        ));
        let signing_key = any_supported_type(&key_der)
            .map_err(|e| anyhow!("private key rejected by TLS stack: {e}"))?;
        Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
    }
}

impl Debug for ManagerCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerCertResolver").finish_non_exhaustive()
    }
}

impl ResolvesServerCert for ManagerCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name()?;
        match self.certified_key(server_name) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!("no usable certificate for TLS handshake with {server_name}: {err:#}");
                None
            }
        }
    }
}

/// Serves a trivial HTTPS endpoint using the manager for certificate
/// selection. Every request gets a one-line status body; the point is the
/// handshake, not the content.
pub async fn serve(manager: Arc<CertificateManager>, addr: &str) -> anyhow::Result<()> {
    let resolver = Arc::new(ManagerCertResolver::new(manager));
    // name the provider explicitly: the dependency graph carries more than
    // one rustls crypto backend, so the implicit default would be ambiguous
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("selecting TLS protocol versions")?
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    let acceptor = TlsAcceptor::from(Arc::new(config));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding TLS listener on {addr}"))?;
    info!("listening for TLS connections on {addr}");
    loop {
        let (stream, peer) = listener.accept().await.context("accepting connection")?;
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(acceptor, stream).await {
                debug!("connection from {peer} ended with error: {err:#}");
            }
        });
    }
}

async fn handle_connection(acceptor: TlsAcceptor, stream: TcpStream) -> anyhow::Result<()> {
    let mut tls = acceptor.accept(stream).await?;
    // drain the request head, then answer with a fixed response
    let mut buf = [0u8; 4096];
    let _ = tls.read(&mut buf).await?;
    let body = "certsteward is serving\n";
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    tls.write_all(response.as_bytes()).await?;
    tls.shutdown().await?;
    Ok(())
}
