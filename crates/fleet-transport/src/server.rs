//! The server lifecycle (spec §4.4): accepts connections behind a TLS
//! listener and, on `stop()`, stops accepting, waits for the accept loop to
//! exit, then drains every in-flight connection before returning.
//! Idempotent.
//!
//! Built on a `watch::channel<bool>` + `Mutex<usize>` + `Notify` rather than
//! a cancellation-token crate, matching this workspace's existing
//! dependency set (no `tokio-util` dependency exists here).

use std::net::SocketAddr;
use std::sync::Arc;

use fleet_core::error::CoreError;
use fleet_core::future::BoxFuture;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::server::TlsStream;

use crate::listener::TlsListener;

/// Per-connection entry point: decides what an accepted, TLS-terminated
/// stream becomes (the RPC frame loop, or an HTTP side-channel request).
/// This crate only owns accept/shutdown sequencing, not that decision
/// (spec §9: prefer a capability struct over a back-pointer into a larger
/// "server" type).
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, stream: TlsStream<TcpStream>, peer: SocketAddr, connection_id: u64) -> BoxFuture<'static, ()>;
}

impl<F> ConnectionHandler for F
where
    F: Fn(TlsStream<TcpStream>, SocketAddr, u64) -> BoxFuture<'static, ()> + Send + Sync + 'static,
{
    fn handle(&self, stream: TlsStream<TcpStream>, peer: SocketAddr, connection_id: u64) -> BoxFuture<'static, ()> {
        (self)(stream, peer, connection_id)
    }
}

struct Lifecycle {
    shutdown_tx: watch::Sender<bool>,
    in_flight: Mutex<usize>,
    drained: Notify,
}

/// Owns one accept loop. `stop()` is idempotent and safe to call from any
/// task, any number of times.
pub struct Server {
    local_addr: SocketAddr,
    lifecycle: Arc<Lifecycle>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Bind the listener and spawn the accept loop immediately, dispatching
    /// each accepted connection to `handler`.
    pub async fn spawn<H>(addr: SocketAddr, tls_config: Arc<ServerConfig>, handler: H) -> Result<Self, CoreError>
    where
        H: ConnectionHandler,
    {
        let listener = TlsListener::bind(addr, tls_config).await?;
        let local_addr = listener.local_addr();

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let lifecycle = Arc::new(Lifecycle {
            shutdown_tx,
            in_flight: Mutex::new(0),
            drained: Notify::new(),
        });
        let handler = Arc::new(handler);

        let loop_lifecycle = lifecycle.clone();
        let accept_task = tokio::spawn(async move {
            let mut next_connection_id: u64 = 0;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(err) => {
                                tracing::warn!(error = %err, "accept failed, continuing");
                                continue;
                            }
                        };
                        next_connection_id += 1;
                        let connection_id = next_connection_id;
                        spawn_connection(loop_lifecycle.clone(), handler.clone(), stream, peer, connection_id);
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            lifecycle,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, wait for the accept loop to exit, then wait for
    /// every in-flight connection to finish (spec §4.4's shutdown
    /// sequence).
    pub async fn stop(&self) {
        let _ = self.lifecycle.shutdown_tx.send(true);

        if let Some(task) = self.accept_task.lock().await.take() {
            let _ = task.await;
        }

        loop {
            if *self.lifecycle.in_flight.lock().await == 0 {
                return;
            }
            self.lifecycle.drained.notified().await;
        }
    }
}

fn spawn_connection(
    lifecycle: Arc<Lifecycle>,
    handler: Arc<dyn ConnectionHandler>,
    stream: TlsStream<TcpStream>,
    peer: SocketAddr,
    connection_id: u64,
) {
    tokio::spawn(async move {
        *lifecycle.in_flight.lock().await += 1;
        handler.handle(stream, peer, connection_id).await;
        let mut count = lifecycle.in_flight.lock().await;
        *count -= 1;
        if *count == 0 {
            lifecycle.drained.notify_waiters();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use rcgen::generate_simple_self_signed;
    use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use tokio::net::TcpStream as PlainTcpStream;

    fn test_tls_config() -> (Arc<ServerConfig>, Vec<u8>) {
        let cert = generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_der = CertificateDer::from(cert.cert.der().to_vec());
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der.clone()], key_der)
            .unwrap();
        (Arc::new(config), cert_der.to_vec())
    }

    #[tokio::test]
    async fn stop_waits_for_the_accept_loop_and_in_flight_connections() {
        let (tls_config, _cert_bytes) = test_tls_config();
        let handled = Arc::new(AtomicUsize::new(0));
        let handled_for_closure = handled.clone();

        let server = Server::spawn(
            "127.0.0.1:0".parse().unwrap(),
            tls_config,
            move |_stream: TlsStream<TcpStream>, _peer, _id| {
                let handled = handled_for_closure.clone();
                Box::pin(async move {
                    handled.fetch_add(1, Ordering::SeqCst);
                }) as BoxFuture<'static, ()>
            },
        )
        .await
        .unwrap();

        let addr = server.local_addr();
        // A bare TCP connect without completing the TLS handshake; the
        // handler only runs post-handshake, so this just exercises that
        // `stop()` terminates promptly even with no successful handshake.
        let _ = PlainTcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(5), server.stop()).await.unwrap();
        assert_eq!(handled.load(Ordering::SeqCst), 0, "handler only runs after a completed TLS handshake");
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (tls_config, _) = test_tls_config();
        let server = Server::spawn(
            "127.0.0.1:0".parse().unwrap(),
            tls_config,
            |_stream: TlsStream<TcpStream>, _peer, _id| Box::pin(async {}) as BoxFuture<'static, ()>,
        )
        .await
        .unwrap();

        server.stop().await;
        server.stop().await;
    }
}
