use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router, extract,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use eyre::Result;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::{
    bridge::{Bridge, BridgeError},
    cache::CircuitSnapshot,
    config::DeviceInfo,
    defs::{Circuit, Field, Mode},
};

struct AppState {
    bridge: Bridge,
    device: DeviceInfo,
}

pub async fn serve(addr: SocketAddr, bridge: Bridge, device: DeviceInfo) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Serving the API on http://{addr}");

    axum::serve(listener, create_router(bridge, device)).await?;

    Ok(())
}

pub fn create_router(bridge: Bridge, device: DeviceInfo) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/circuits", get(list_circuits))
        .route("/circuits/{circuit}", get(get_circuit))
        .route("/circuits/{circuit}/refresh", post(refresh_circuit))
        .route(
            "/circuits/{circuit}/{field}",
            get(read_field).put(write_field),
        )
        .with_state(Arc::new(AppState { bridge, device }))
}

/* === Routes === */

/* == Status == */

async fn status(extract::State(state): extract::State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "manufacturer": state.device.manufacturer,
        "model": state.device.model,
        "queue": {
            "depth": state.bridge.queue_depth(),
            "draining": state.bridge.is_draining(),
        },
        "circuits": state.bridge.snapshots(),
    }))
}

/* == Circuits == */

async fn list_circuits(
    extract::State(state): extract::State<Arc<AppState>>,
) -> Json<Vec<CircuitSnapshot>> {
    Json(state.bridge.snapshots())
}

async fn get_circuit(
    extract::State(state): extract::State<Arc<AppState>>,
    extract::Path(circuit): extract::Path<String>,
) -> Result<Json<CircuitSnapshot>, ApiError> {
    let circuit = parse_circuit(&circuit)?;

    Ok(Json(state.bridge.snapshot(circuit)?))
}

/* == Fields == */

#[derive(Deserialize)]
struct ReadQuery {
    #[serde(default)]
    fresh: bool,
}

#[derive(Serialize)]
struct FieldResponse {
    circuit: Circuit,
    field: Field,
    value: f32,
    fresh: bool,
}

async fn read_field(
    extract::State(state): extract::State<Arc<AppState>>,
    extract::Path((circuit, field)): extract::Path<(String, String)>,
    extract::Query(query): extract::Query<ReadQuery>,
) -> Result<Json<FieldResponse>, ApiError> {
    let circuit = parse_circuit(&circuit)?;
    let field = parse_field(&field)?;

    if query.fresh {
        match state.bridge.read_fresh(circuit, field).await {
            Ok(value) => {
                return Ok(Json(FieldResponse {
                    circuit,
                    field,
                    value,
                    fresh: true,
                }));
            }

            // Readers prefer a stale value over an error.
            Err(err) => tracing::warn!("Fresh read failed, serving the cached value: {err}"),
        }
    }

    let value = state.bridge.cached(circuit, field)?;

    Ok(Json(FieldResponse {
        circuit,
        field,
        value,
        fresh: false,
    }))
}

#[derive(Deserialize)]
struct WritePayload {
    value: Option<f32>,
    mode: Option<Mode>,
}

async fn write_field(
    extract::State(state): extract::State<Arc<AppState>>,
    extract::Path((circuit, field)): extract::Path<(String, String)>,
    extract::Json(payload): extract::Json<WritePayload>,
) -> Result<Json<FieldResponse>, ApiError> {
    let circuit = parse_circuit(&circuit)?;
    let field = parse_field(&field)?;

    match (field, payload.mode, payload.value) {
        (Field::TargetMode, Some(mode), _) => state.bridge.set_target_mode(circuit, mode).await?,
        (_, _, Some(value)) => state.bridge.write_raw(circuit, field, value).await?,

        _ => {
            return Err(ApiError(
                StatusCode::BAD_REQUEST,
                "the payload carries neither a value nor a mode".to_owned(),
            ));
        }
    }

    let value = state.bridge.cached(circuit, field)?;

    Ok(Json(FieldResponse {
        circuit,
        field,
        value,
        fresh: false,
    }))
}

/* == Refresh == */

async fn refresh_circuit(
    extract::State(state): extract::State<Arc<AppState>>,
    extract::Path(circuit): extract::Path<String>,
) -> Result<Json<CircuitSnapshot>, ApiError> {
    let circuit = parse_circuit(&circuit)?;

    Ok(Json(state.bridge.refresh_circuit(circuit).await?))
}

/* === Errors === */

struct ApiError(StatusCode, String);

impl From<BridgeError> for ApiError {
    fn from(error: BridgeError) -> Self {
        let status = match &error {
            BridgeError::UnknownCircuit(_) => StatusCode::NOT_FOUND,

            BridgeError::NotReadable { .. } | BridgeError::NotWritable { .. } => {
                StatusCode::BAD_REQUEST
            }

            BridgeError::OutOfRange { .. } | BridgeError::UnknownMode { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            BridgeError::Command(_) => StatusCode::BAD_GATEWAY,
        };

        Self(status, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

fn parse_circuit(raw: &str) -> Result<Circuit, ApiError> {
    raw.parse()
        .map_err(|_| ApiError(StatusCode::NOT_FOUND, format!("unknown circuit {raw:?}")))
}

fn parse_field(raw: &str) -> Result<Field, ApiError> {
    raw.parse()
        .map_err(|_| ApiError(StatusCode::NOT_FOUND, format!("unknown field {raw:?}")))
}

/* === Tests === */
