//! `fleet-http`: the HTTP side-channel handlers (C5 — spec §4.5). The RPC
//! upgrade paths (`/`, `/environment/{uuid}/api`) belong to
//! `fleet-transport`'s accept loop; everything else — log streaming, charm
//! and tool uploads, backup download — is plain request/response (or
//! upload/download) HTTP handled here, hand-rolled on top of `httparse`
//! since this workspace carries no web framework.

pub mod auth;
pub mod backup;
pub mod charm_upload;
pub mod http_io;
pub mod log_stream;
pub mod object_store;
pub mod router;
pub mod tools_upload;

use std::path::Path;
use std::sync::Arc;

use fleet_core::error::CoreError;
use fleet_core::state::StateStore;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;

use crate::object_store::ObjectStore;
use crate::router::Route;

/// Everything a side-channel connection needs: the state store for auth and
/// (for uploads) transactional writes, the object store uploads land in,
/// this server's own environment uuid (for URL validation), and the path to
/// the log file the log-stream handler tails.
pub struct SideChannelContext {
    pub state: Arc<dyn StateStore>,
    pub object_store: Arc<dyn ObjectStore>,
    pub environment_uuid: String,
    pub log_path: std::path::PathBuf,
    pub backup_scratch_root: std::path::PathBuf,
}

/// Handle one HTTP side-channel request end to end: parse the head, route
/// it, authenticate, dispatch to the matching handler, and write the
/// response. `cancel` is notified by the caller if the underlying socket is
/// observed closing mid-stream (only the log-stream handler consults it).
pub async fn handle_request<S>(ctx: &SideChannelContext, stream: &mut S, cancel: &Notify) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = match http_io::read_request_head(stream).await {
        Ok(head) => head,
        Err(err) => {
            return http_io::write_response(stream, 400, "Bad Request", &[], err.message().as_bytes()).await;
        }
    };

    let route = router::route(&head.path, &ctx.environment_uuid);
    let Some(route) = route else {
        return http_io::write_not_found(stream).await;
    };

    if route == Route::Backup && head.method != "POST" {
        return http_io::write_method_not_allowed(stream).await;
    }

    let authenticator = match auth::require_human_user(&ctx.state, head.header("Authorization")).await {
        Ok(authenticator) => authenticator,
        Err(_) => return http_io::write_unauthorized(stream, &ctx.environment_uuid).await,
    };
    tracing::debug!(path = %head.path, user = %authenticator.tag(), "side-channel request authenticated");

    match route {
        Route::Log => handle_log(ctx, &head, stream, cancel).await,
        Route::Charms => handle_charms(ctx, &head, stream).await,
        Route::Tools => handle_tools(ctx, &head, stream).await,
        Route::Backup => handle_backup(ctx, stream).await,
    }
}

async fn handle_log<S>(
    ctx: &SideChannelContext,
    head: &http_io::RequestHead,
    stream: &mut S,
    cancel: &Notify,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let query = match log_stream::parse_query(head) {
        Ok(query) => query,
        Err(err) => return write_stream_error(stream, &err).await,
    };
    match log_stream::stream_log(&ctx.log_path, query, stream, cancel).await {
        Ok(()) => Ok(()),
        Err(err) => write_stream_error(stream, &err).await,
    }
}

async fn write_stream_error<S>(stream: &mut S, err: &CoreError) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let frame = serde_json::json!({ "error": { "message": err.message() } });
    let mut encoded = serde_json::to_vec(&frame).unwrap_or_default();
    encoded.push(b'\n');
    use tokio::io::AsyncWriteExt;
    stream.write_all(&encoded).await?;
    stream.flush().await
}

async fn handle_charms<S>(ctx: &SideChannelContext, head: &http_io::RequestHead, stream: &mut S) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let series = head.query_one("series").unwrap_or("").to_string();
    let mut body = Vec::new();
    if let Err(err) = http_io::read_body_to_writer(stream, head, &mut body).await {
        return http_io::write_json_response(stream, 400, "Bad Request", &serde_json::json!({ "error": err.message() })).await;
    }

    match charm_upload::handle_upload(&ctx.state, &ctx.object_store, &series, &body).await {
        Ok(response) => {
            let body = serde_json::to_value(&response).unwrap_or(serde_json::Value::Null);
            http_io::write_json_response(stream, 200, "OK", &body).await
        }
        Err(err) => {
            http_io::write_json_response(stream, 400, "Bad Request", &serde_json::json!({ "error": err.message() })).await
        }
    }
}

async fn handle_tools<S>(ctx: &SideChannelContext, head: &http_io::RequestHead, stream: &mut S) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let binary_version = head.query_one("binaryVersion").unwrap_or("").to_string();
    let series = head.query_one("series").map(|s| s.to_string());
    let mut body = Vec::new();
    if let Err(err) = http_io::read_body_to_writer(stream, head, &mut body).await {
        return http_io::write_json_response(stream, 400, "Bad Request", &serde_json::json!({ "error": err.message() })).await;
    }

    match tools_upload::handle_upload(&ctx.object_store, &binary_version, series.as_deref(), &body).await {
        Ok(response) => {
            let body = serde_json::to_value(&response).unwrap_or(serde_json::Value::Null);
            http_io::write_json_response(stream, 200, "OK", &body).await
        }
        Err(err) => {
            http_io::write_json_response(stream, 400, "Bad Request", &serde_json::json!({ "error": err.message() })).await
        }
    }
}

async fn handle_backup<S>(ctx: &SideChannelContext, stream: &mut S) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    struct NoopSource;
    impl backup::BackupSource for NoopSource {
        fn populate(&self, _scratch_dir: &Path) -> Result<(), CoreError> {
            Ok(())
        }
    }

    let result = tokio::task::spawn_blocking({
        let scratch_root = ctx.backup_scratch_root.clone();
        move || backup::run_backup(&NoopSource, &scratch_root)
    })
    .await;

    let archive = match result {
        Ok(Ok(archive)) => archive,
        Ok(Err(err)) => {
            return http_io::write_response(stream, 500, "Internal Server Error", &[], err.message().as_bytes()).await;
        }
        Err(_) => {
            return http_io::write_response(stream, 500, "Internal Server Error", &[], b"backup task panicked").await;
        }
    };

    let sha_header = archive.sha256.clone();
    let result = http_io::write_response(
        stream,
        200,
        "OK",
        &[("Content-Type", "application/octet-stream"), ("X-Content-SHA", sha_header.as_str())],
        &archive.bytes,
    )
    .await;
    backup::cleanup(&archive);
    result
}
