//! WebSocket listener: accept loop, TLS, and the single-agent slot.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::orchestrator::Orchestrator;
use crate::session::run_session;

/// Accepts agent connections and runs one session per accepted socket.
///
/// v1 is single-agent: one connection slot exists, and while it is held
/// any further connection is dropped at the transport layer before a
/// single frame is read.
pub struct GatewayServer {
    orchestrator: Arc<Orchestrator>,
    agent_token: String,
    tls: Option<TlsAcceptor>,
    slot: Arc<Semaphore>,
}

impl GatewayServer {
    /// Wire up the server. `tls` of `None` means plaintext, which the CLI
    /// only permits under `--insecure`.
    #[must_use]
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        agent_token: String,
        tls: Option<TlsAcceptor>,
    ) -> Self {
        Self {
            orchestrator,
            agent_token,
            tls,
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    /// Accept connections until the shutdown signal flips.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Io`] if the listener address cannot be read;
    /// per-connection failures are logged and absorbed.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> GatewayResult<()> {
        info!(
            addr = %listener.local_addr()?,
            tls = self.tls.is_some(),
            "gateway listening"
        );
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("listener stopping");
                    return Ok(());
                },
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _peer)) => self.accept_connection(stream),
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                },
            }
        }
    }

    fn accept_connection(&self, stream: TcpStream) {
        let Ok(permit) = Arc::clone(&self.slot).try_acquire_owned() else {
            debug!("refusing second concurrent agent connection");
            drop(stream);
            return;
        };

        let orchestrator = Arc::clone(&self.orchestrator);
        let token = self.agent_token.clone();
        let tls = self.tls.clone();
        tokio::spawn(async move {
            let _slot = permit;
            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => match tokio_tungstenite::accept_async(tls_stream).await {
                        Ok(ws) => run_session(ws, orchestrator, &token).await,
                        Err(e) => debug!(error = %e, "websocket handshake failed"),
                    },
                    Err(e) => debug!(error = %e, "TLS handshake failed"),
                },
                None => match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => run_session(ws, orchestrator, &token).await,
                    Err(e) => debug!(error = %e, "websocket handshake failed"),
                },
            }
        });
    }
}

/// Build a TLS acceptor from PEM-encoded material on disk.
///
/// # Errors
///
/// [`GatewayError::Io`] for unreadable files, [`GatewayError::Tls`] for
/// undecodable material.
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> GatewayResult<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(std::fs::File::open(cert_path)?))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| GatewayError::Tls(format!("bad certificate chain: {e}")))?;
    if certs.is_empty() {
        return Err(GatewayError::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }
    let key = rustls_pemfile::private_key(&mut BufReader::new(std::fs::File::open(key_path)?))
        .map_err(|e| GatewayError::Tls(format!("bad private key: {e}")))?
        .ok_or_else(|| {
            GatewayError::Tls(format!("no private key found in {}", key_path.display()))
        })?;

    let config = tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GatewayError::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
