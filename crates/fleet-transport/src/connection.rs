//! The per-connection request/response loop (spec §4.4): reads newline-
//! delimited JSON request frames, enforces "first call must be
//! `Admin[\"\"].Login`" (spec §4.4 step 1), then dispatches every
//! subsequent frame through whichever `DispatchRoot` login produced.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fleet_core::error::{CoreError, ErrorCategory, codes};
use fleet_core::model::{Credential, HostPort, SecretString, Tag};
use fleet_core::observability::{ConnectionLabel, FrameDirection, ObservabilityFacade};
use fleet_core::state::StateStore;
use fleet_core::auth::Authenticator;
use fleet_dispatch::error_root::ErrorRoot;
use fleet_dispatch::pinger::{Pinger, PresencePinger};
use fleet_dispatch::registry::FacadeRegistry;
use fleet_dispatch::root::{ConnectionRoot, DispatchRoot};
use fleet_dispatch::upgrade::UpgradeGate;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Notify};

use crate::wire::{RequestFrame, ResponseFrame};

/// Whether the server is mid-upgrade or in a terminal misconfigured state;
/// read once per login to pick which root wrapper to attach (spec §4.3,
/// §4.4 step 5).
#[derive(Clone, Copy, Debug, Default)]
pub enum ServerMode {
    #[default]
    Normal,
    Upgrading,
    Errored,
}

#[derive(Deserialize)]
struct LoginParams {
    tag: String,
    password: String,
    #[serde(default)]
    nonce: Option<String>,
}

enum ConnectionState {
    AwaitingLogin,
    Active {
        root: Arc<dyn DispatchRoot>,
        pinger: Arc<Pinger>,
        /// Started only for machine/unit agent logins (spec §4.4 step 6);
        /// absent for human users and the anonymous empty-tag login.
        presence: Option<Arc<PresencePinger>>,
    },
}

pub struct ConnectionHandlerConfig {
    pub registry: Arc<FacadeRegistry>,
    pub state: Arc<dyn StateStore>,
    pub observability: Arc<dyn ObservabilityFacade>,
    pub login_gate: crate::login::LoginGate,
    pub server_mode: ServerMode,
    pub startup_error: Option<CoreError>,
    pub ping_interval: Duration,
}

/// Drive one accepted connection to completion. Returns once the peer
/// disconnects or a fatal I/O error occurs; always tears down whatever
/// resources the connection accumulated (spec §5: "closing the underlying
/// connection cancels all in-flight work attributable to it").
pub async fn run_connection<S>(
    stream: S,
    peer: SocketAddr,
    connection_id: u64,
    config: ConnectionHandlerConfig,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let label = ConnectionLabel {
        connection_id,
        remote: peer.to_string(),
    };
    let span = config.observability.connection_span(&label);
    let _entered = span.enter();

    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    // Notified once by the pinger's expiry action (spec §4.3/§4.4: "the
    // server wires this to `conn.close()` to eject silent clients") so the
    // read loop below can abandon a blocked `lines.next_line()` instead of
    // waiting for the silent peer to send or disconnect on its own.
    let close_signal = Arc::new(Notify::new());

    let (tx, mut rx) = mpsc::unbounded_channel::<ResponseFrame>();
    // One writer task serializes every outbound frame (spec §3: "a
    // connection's outgoing frames are serialized").
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(mut encoded) = serde_json::to_vec(&frame) else {
                continue;
            };
            encoded.push(b'\n');
            if writer.write_all(&encoded).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut state_machine = ConnectionState::AwaitingLogin;

    loop {
        let line = tokio::select! {
            _ = close_signal.notified() => {
                tracing::info!("pinger expired with no activity, closing connection");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if !line.trim().is_empty() => line,
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(error = %err, "connection read error, closing");
                    break;
                }
            },
        };

        let frame: RequestFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(error = %err, "malformed request frame, closing connection");
                break;
            }
        };

        if let ConnectionState::Active { pinger, .. } = &state_machine {
            pinger.reset();
        }
        config
            .observability
            .record_frame(FrameDirection::Inbound, &frame.facade, &frame.method);

        let response = match &mut state_machine {
            ConnectionState::AwaitingLogin => {
                handle_pre_login_frame(&frame, peer, &config, &mut state_machine, &close_signal).await
            }
            ConnectionState::Active { root, .. } => {
                root.dispatch(&frame.facade, frame.version, &frame.id, &frame.method, frame.params.clone())
                    .await
                    .map(|value| ResponseFrame::ok(frame.request_id, value))
                    .unwrap_or_else(|err| ResponseFrame::err(frame.request_id, &err))
            }
        };

        config
            .observability
            .record_frame(FrameDirection::Outbound, &frame.facade, &frame.method);
        if tx.send(response).is_err() {
            break;
        }
    }

    if let ConnectionState::Active { root, pinger, presence } = state_machine {
        let _ = pinger.stop().await;
        if let Some(presence) = presence {
            let _ = presence.stop().await;
        }
        drop(root);
    }
    drop(tx);
    let _ = writer_task.await;
}

async fn handle_pre_login_frame(
    frame: &RequestFrame,
    peer: SocketAddr,
    config: &ConnectionHandlerConfig,
    state_machine: &mut ConnectionState,
    close_signal: &Arc<Notify>,
) -> ResponseFrame {
    if frame.facade != "Admin" || frame.method != "Login" {
        return ResponseFrame::err(
            frame.request_id,
            &CoreError::new(codes::NOT_LOGGED_IN, ErrorCategory::Authorization, "not logged in"),
        );
    }

    let permit = match config.login_gate.try_admit() {
        Ok(permit) => permit,
        Err(err) => return ResponseFrame::err(frame.request_id, &err),
    };

    match do_login(frame, peer, config).await {
        Ok((result, root, authenticator)) => {
            let expired = close_signal.clone();
            let pinger = Pinger::spawn(config.ping_interval, move || {
                expired.notify_one();
                tracing::info!("connection pinger expired, closing connection");
            });
            let presence = if authenticator.is_machine_agent() || authenticator.is_unit_agent() {
                Some(PresencePinger::spawn(
                    config.ping_interval,
                    config.state.clone(),
                    authenticator.tag().clone(),
                ))
            } else {
                None
            };
            *state_machine = ConnectionState::Active { root, pinger, presence };
            drop(permit);
            match serde_json::to_value(result) {
                Ok(value) => ResponseFrame::ok(frame.request_id, value),
                Err(_) => ResponseFrame::err(frame.request_id, &CoreError::internal("could not encode login result")),
            }
        }
        Err(err) => {
            drop(permit);
            ResponseFrame::err(frame.request_id, &err)
        }
    }
}

async fn do_login(
    frame: &RequestFrame,
    peer: SocketAddr,
    config: &ConnectionHandlerConfig,
) -> Result<(fleet_core::model::LoginResult, Arc<dyn DispatchRoot>, Arc<dyn Authenticator>), CoreError> {
    let params: LoginParams = serde_json::from_value(frame.params.clone())
        .map_err(|err| CoreError::new(codes::INTERNAL, ErrorCategory::Internal, format!("bad login params: {err}")))?;
    let tag: Tag = params.tag.parse()?;
    let credential = Credential {
        tag: tag.clone(),
        password: SecretString::new(params.password),
        nonce: params.nonce,
    };

    let authenticator = config.state.check_credentials(&credential).await?;
    if authenticator.is_environ_manager() {
        config.state.promote_machine_credential(&tag).await?;
    }

    let persisted = config.state.api_host_ports().await?;
    let arrival = vec![HostPort::new(peer.ip().to_string(), peer.port())];
    let result = fleet_core::model::LoginResult {
        servers: vec![persisted, arrival],
    };

    // spec §8: an empty-tag login establishes the connection (the caller
    // still gets a `LoginResult` and a live pinger) but owns no facade
    // surface — every subsequent call is rejected the same way a call
    // before `Login` would be.
    let root: Arc<dyn DispatchRoot> = if tag == Tag::Environment {
        Arc::new(ErrorRoot::new(CoreError::new(
            codes::NOT_LOGGED_IN,
            ErrorCategory::Authorization,
            "not logged in",
        )))
    } else if let Some(startup_error) = &config.startup_error {
        Arc::new(ErrorRoot::new(startup_error.clone()))
    } else {
        let connection_root = ConnectionRoot::new(authenticator.clone(), config.registry.clone(), config.state.clone());
        match config.server_mode {
            ServerMode::Normal => Arc::new(connection_root),
            ServerMode::Upgrading => Arc::new(UpgradeGate::new(connection_root)),
            ServerMode::Errored => Arc::new(ErrorRoot::new(CoreError::new(
                codes::SHUTDOWN,
                ErrorCategory::Internal,
                "server has entered a terminal state",
            ))),
        }
    };

    Ok((result, root, authenticator))
}
