//! A minimal TLS-terminating listener (spec §4.4: "binds a TLS listener,
//! accepts connections, upgrades each to a framed bidirectional message
//! channel").

use std::net::SocketAddr;
use std::sync::Arc;

use fleet_core::error::{CoreError, ErrorCategory, codes};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::server::TlsStream;

fn map_io_error(action: &'static str, err: std::io::Error) -> CoreError {
    CoreError::new(codes::INTERNAL, ErrorCategory::Internal, format!("{action}: {err}"))
}

/// Binds exactly one TCP socket and terminates TLS on every accepted
/// connection. Certificate/key material is the caller's concern (spec §1:
/// "TLS certificate management" is out of scope for this crate).
pub struct TlsListener {
    inner: TokioTcpListener,
    acceptor: TlsAcceptor,
    local_addr: SocketAddr,
}

impl TlsListener {
    pub async fn bind(addr: SocketAddr, tls_config: Arc<ServerConfig>) -> Result<Self, CoreError> {
        let inner = TokioTcpListener::bind(addr)
            .await
            .map_err(|err| map_io_error("bind", err))?;
        let local_addr = inner.local_addr().map_err(|err| map_io_error("bind", err))?;
        Ok(Self {
            inner,
            acceptor: TlsAcceptor::from(tls_config),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and TLS-handshake one connection. The returned stream is
    /// ready for the framed RPC loop.
    pub async fn accept(&self) -> Result<(TlsStream<TcpStream>, SocketAddr), CoreError> {
        let (stream, peer) = self.inner.accept().await.map_err(|err| map_io_error("accept", err))?;
        let tls_stream = self
            .acceptor
            .accept(stream)
            .await
            .map_err(|err| map_io_error("tls handshake", err))?;
        Ok((tls_stream, peer))
    }
}
