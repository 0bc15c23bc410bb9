//! Decides, per accepted connection, whether the peer speaks the framed RPC
//! protocol or is issuing an HTTP side-channel request (spec §4.4's URL
//! routing table lives entirely on the HTTP side; this is the byte-sniff
//! that sends a connection down one path or the other).
//!
//! This lives in `fleetd`, not `fleet-transport`, so that crate never needs
//! to depend on `fleet-http` — `fleet-transport::server::Server` only knows
//! about its generic `ConnectionHandler`, not what a connection becomes.

use std::net::SocketAddr;
use std::sync::Arc;

use fleet_core::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_rustls::server::TlsStream;

use fleet_http::SideChannelContext;
use fleet_transport::connection::{run_connection, ConnectionHandlerConfig};

const HTTP_METHOD_PREFIXES: &[&str] = &["GET ", "POST ", "PUT ", "DELETE ", "HEAD ", "OPTIONS "];

/// Build the per-connection closure `Server::spawn` dispatches accepted
/// streams to. `rpc_config` produces a fresh [`ConnectionHandlerConfig`] per
/// connection (its fields are all `Arc`s or `Copy`, so cloning the config is
/// cheap); `http_ctx` is shared read-only across every side-channel request.
pub fn make_handler(
    rpc_config: Arc<dyn Fn() -> ConnectionHandlerConfig + Send + Sync>,
    http_ctx: Arc<SideChannelContext>,
) -> impl Fn(TlsStream<TcpStream>, SocketAddr, u64) -> BoxFuture<'static, ()> + Send + Sync + 'static {
    move |stream, peer, connection_id| {
        let rpc_config = rpc_config.clone();
        let http_ctx = http_ctx.clone();
        Box::pin(async move {
            let mut buffered = BufReader::new(stream);
            let looks_like_http = match buffered.fill_buf().await {
                Ok(prefix) => HTTP_METHOD_PREFIXES.iter().any(|p| prefix.starts_with(p.as_bytes())),
                Err(err) => {
                    tracing::debug!(error = %err, connection_id, "peek failed, dropping connection");
                    return;
                }
            };

            if looks_like_http {
                let cancel = Notify::new();
                if let Err(err) = fleet_http::handle_request(&http_ctx, &mut buffered, &cancel).await {
                    tracing::debug!(error = %err, connection_id, "side-channel request failed");
                }
            } else {
                run_connection(buffered, peer, connection_id, (*rpc_config)()).await;
            }
        }) as BoxFuture<'static, ()>
    }
}
