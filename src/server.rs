//! Listener lifecycle: bind (plain or TLS), serve a router, drain on shutdown.
//!
//! Shutdown closes the listener first, then asks every open connection to finish its
//! in-flight requests. A caller-supplied deadline bounds the drain; once it passes, the
//! remaining connections are aborted and [`ServerError::ShutdownTimeout`] is returned.

use crate::config::ServerConfig;
use crate::error::ServerError;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::service::TowerToHyperService;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Running,
    Draining,
    Abort,
    Stopped,
}

/// A bound listener, not yet serving.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    phase: Arc<watch::Sender<Phase>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl Server {
    /// Validate `config`, load the TLS material if enabled, and bind.
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let tls = if config.tls_enabled {
            Some(tls_acceptor(config)?)
        } else {
            None
        };
        let listener = TcpListener::bind(config.listen_addr()).await?;
        let local_addr = listener.local_addr()?;
        let (phase, _) = watch::channel(Phase::Running);
        Ok(Server {
            listener,
            local_addr,
            tls,
            phase: Arc::new(phase),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            phase: Arc::clone(&self.phase),
        }
    }

    /// Accept until shutdown is requested, then drain. Returns once every connection is gone.
    pub async fn serve(self, router: Router) -> Result<(), ServerError> {
        let Server {
            listener,
            local_addr,
            tls,
            phase,
        } = self;
        info!(addr = %local_addr, tls = tls.is_some(), "listening");

        let mut tasks = tokio::task::JoinSet::new();
        let mut state = phase.subscribe();

        loop {
            tokio::select! {
                biased;

                () = until(&mut state, |p| p != Phase::Running) => {
                    info!(in_flight = tasks.len(), "shutdown requested, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let router = router.clone();
                    let conn_state = phase.subscribe();
                    let tls = tls.clone();
                    tasks.spawn(async move {
                        match tls {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(stream) => drive(stream, router, conn_state, peer).await,
                                Err(e) => debug!(peer = %peer, error = %e, "tls handshake failed"),
                            },
                            None => drive(stream, router, conn_state, peer).await,
                        }
                    });
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }
        drop(listener);

        loop {
            tokio::select! {
                biased;

                () = until(&mut state, |p| p == Phase::Abort) => {
                    warn!(remaining = tasks.len(), "drain deadline passed, aborting connections");
                    tasks.abort_all();
                    break;
                }

                next = tasks.join_next() => {
                    if next.is_none() {
                        break;
                    }
                }
            }
        }
        while tasks.join_next().await.is_some() {}

        phase.send_replace(Phase::Stopped);
        info!("server stopped");
        Ok(())
    }
}

/// Resolves once the phase satisfies `done`, or the server is gone.
async fn until(state: &mut watch::Receiver<Phase>, done: impl Fn(Phase) -> bool) {
    let _ = state.wait_for(|p| done(*p)).await;
}

/// Serve one connection, switching to graceful close once the server leaves `Running`.
async fn drive<I>(io: I, router: Router, mut state: watch::Receiver<Phase>, peer: SocketAddr)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(io), TowerToHyperService::new(router));
    tokio::pin!(conn);
    tokio::select! {
        res = conn.as_mut() => {
            if let Err(e) = res {
                debug!(peer = %peer, error = %e, "connection closed with error");
            }
            return;
        }
        () = until(&mut state, |p| p != Phase::Running) => {}
    }
    conn.as_mut().graceful_shutdown();
    if let Err(e) = conn.await {
        debug!(peer = %peer, error = %e, "connection closed with error during drain");
    }
}

fn tls_acceptor(config: &ServerConfig) -> Result<TlsAcceptor, ServerError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(&config.cert_file)?))
        .collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(ServerError::Tls(format!("no certificate in {}", config.cert_file)));
    }
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(&config.key_file)?))?
        .ok_or_else(|| ServerError::Tls(format!("no private key in {}", config.key_file)))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut tls = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    tls.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(TlsAcceptor::from(Arc::new(tls)))
}

/// Stops a [`Server`] from another task.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    phase: Arc<watch::Sender<Phase>>,
}

impl ShutdownHandle {
    /// Close the listener and wait up to `deadline` for in-flight requests.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ServerError> {
        self.phase.send_if_modified(|p| {
            let start = *p == Phase::Running;
            if start {
                *p = Phase::Draining;
            }
            start
        });
        let mut state = self.phase.subscribe();
        match tokio::time::timeout(deadline, until(&mut state, |p| p == Phase::Stopped)).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.phase.send_if_modified(|p| {
                    let abort = *p == Phase::Draining;
                    if abort {
                        *p = Phase::Abort;
                    }
                    abort
                });
                Err(ServerError::ShutdownTimeout(deadline))
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.phase.borrow() == Phase::Stopped
    }
}
