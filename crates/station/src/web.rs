use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Form, State};
use axum::response::{Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::calibration::CalibratedSample;
use crate::channel::ChannelReadings;
use crate::error::StationError;
use crate::protocol::{parse_push_message, PushCommand};
use crate::relay::{Mode, RelayId, RelaySnapshot, Switch};
use crate::state::{Series, SharedState, StatusResponse, Thresholds};

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/last", get(last))
        .route("/data", get(data))
        .route("/relay-status", get(relay_status))
        .route("/button", post(button))
        .route("/mode", get(get_mode).post(post_mode))
        .route("/thresholds", get(get_thresholds).post(post_thresholds))
        .route("/channels", get(channels))
        .route("/api/status", get(api_status))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

/// Latest sample rounded to two places, or all `null` before the first commit.
#[derive(Debug, Default, Serialize)]
struct LastResponse {
    ph: Option<f64>,
    turb: Option<f64>,
    oks: Option<f64>,
    suhu: Option<f64>,
}

impl From<Option<CalibratedSample>> for LastResponse {
    fn from(sample: Option<CalibratedSample>) -> Self {
        match sample {
            Some(s) => Self {
                ph: Some(round2(s.ph)),
                turb: Some(round2(s.turbidity)),
                oks: Some(round2(s.oxygen)),
                suhu: Some(round2(s.temperature)),
            },
            None => Self::default(),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Deserialize)]
struct ButtonForm {
    relay: Option<String>,
    state: Option<String>,
}

#[derive(Deserialize)]
struct ModeForm {
    mode: Option<String>,
}

#[derive(Serialize)]
struct ModeResponse {
    mode: Mode,
}

#[derive(Deserialize)]
struct ThresholdUpdate {
    sensor: String,
    min: f64,
    max: f64,
}

fn required<'a>(field: &str, value: &'a Option<String>) -> Result<&'a str, StationError> {
    value
        .as_deref()
        .ok_or_else(|| StationError::InvalidArgument(format!("missing '{field}'")))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn last(State(state): State<SharedState>) -> Json<LastResponse> {
    Json(state.latest().await.into())
}

async fn data(State(state): State<SharedState>) -> Json<Series> {
    Json(state.series().await)
}

async fn relay_status(State(state): State<SharedState>) -> Json<RelaySnapshot> {
    Json(state.relay_snapshot().await)
}

/// Syntax is checked before the mode, so a malformed request is a 400 even
/// in automatic mode.
async fn button(
    State(state): State<SharedState>,
    Form(form): Form<ButtonForm>,
) -> Result<Json<RelaySnapshot>, StationError> {
    let id: RelayId = required("relay", &form.relay)?.parse()?;
    let switch: Switch = required("state", &form.state)?.parse()?;
    let snapshot = state.command_relay(id, switch.is_on()).await?;
    Ok(Json(snapshot))
}

async fn get_mode(State(state): State<SharedState>) -> Json<ModeResponse> {
    Json(ModeResponse {
        mode: state.mode().await,
    })
}

async fn post_mode(
    State(state): State<SharedState>,
    Form(form): Form<ModeForm>,
) -> Result<Json<RelaySnapshot>, StationError> {
    let mode: Mode = required("mode", &form.mode)?.parse()?;
    Ok(Json(state.set_mode(mode).await))
}

async fn get_thresholds(State(state): State<SharedState>) -> Json<Thresholds> {
    Json(state.thresholds().await)
}

/// Body errors are reported as 400 like every other invalid argument.
async fn post_thresholds(
    State(state): State<SharedState>,
    body: Result<Json<ThresholdUpdate>, JsonRejection>,
) -> Result<Json<Thresholds>, StationError> {
    let Json(update) = body?;
    let thresholds = state
        .update_threshold(&update.sensor, update.min, update.max)
        .await?;
    Ok(Json(thresholds))
}

async fn channels(State(state): State<SharedState>) -> Json<ChannelReadings> {
    Json(state.readings().await)
}

async fn api_status(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(state.status().await)
}

// ---------------------------------------------------------------------------
// Push channel
// ---------------------------------------------------------------------------

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    ws.on_upgrade(move |socket| push_session(socket, state))
}

/// Serve one subscriber until either side goes away. The subscription is
/// taken before the initial snapshot is sent, so no change can slip between.
async fn push_session(mut socket: WebSocket, state: SharedState) {
    let (initial, mut updates) = state.broadcaster().subscribe();
    let initial = match initial {
        Some(snapshot) => snapshot,
        None => state.relay_snapshot().await,
    };
    if send_snapshot(&mut socket, &initial).await.is_err() {
        return;
    }
    debug!("push subscriber connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => handle_push_text(&state, text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("push channel read failed: {e}");
                    break;
                }
            },
            update = updates.recv() => match update {
                Ok(snapshot) => {
                    if send_snapshot(&mut socket, &snapshot).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "push subscriber lagged, closing");
                    break;
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("push subscriber disconnected");
}

async fn handle_push_text(state: &SharedState, text: &str) {
    match parse_push_message(text) {
        Some(PushCommand::Relay { id, on }) => {
            if let Err(e) = state.command_relay(id, on).await {
                debug!(relay = %id, on, "push relay command ignored: {e}");
            }
        }
        Some(PushCommand::Mode(mode)) => {
            state.set_mode(mode).await;
        }
        None => warn!(text, "unrecognised push message ignored"),
    }
}

async fn send_snapshot(socket: &mut WebSocket, snapshot: &RelaySnapshot) -> Result<()> {
    let json = serde_json::to_string(snapshot)?;
    socket.send(Message::Text(json.into())).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: SharedState) -> Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(state);

    #[cfg(feature = "tls")]
    let app = match (env::var("TLS_CERT"), env::var("TLS_KEY")) {
        (Ok(cert), Ok(key)) => return serve_tls(addr, app, &cert, &key).await,
        _ => app,
    };

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("web ui listening on http://{addr}");

    axum::serve(listener, app).await.context("web server error")
}

#[cfg(feature = "tls")]
async fn serve_tls(addr: SocketAddr, app: Router, cert: &str, key: &str) -> Result<()> {
    let config = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
        .await
        .with_context(|| format!("failed to load TLS cert {cert} / key {key}"))?;

    info!("web ui listening on https://{addr}");

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
