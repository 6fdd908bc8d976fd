use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audio::{AudioState, AudioStats, ChunkFormat};
use crate::config::{AppConfig, ProtocolVariant};
use crate::control::{session, RelayStats};
use crate::error::{AppError, Result};
use crate::input::Mapping;
use crate::state::AppState;
use crate::stream::{ViewerStats, MJPEG_BOUNDARY};
use crate::video::{FrameSourceStats, SourceState};

/// Longest client-supplied viewer id accepted by the MJPEG endpoint
const MAX_CLIENT_ID_LEN: usize = 64;

// ============================================================================
// Health & status
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct VideoStatus {
    pub state: SourceState,
    pub stats: FrameSourceStats,
    /// Generation of the newest published frame
    pub generation: Option<u64>,
    /// Milliseconds since the newest frame was captured
    pub last_frame_age_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct AudioStatus {
    pub state: AudioState,
    pub stats: AudioStats,
    pub format: Option<ChunkFormat>,
    pub subscribers: usize,
}

#[derive(Serialize)]
pub struct RelayStatus {
    pub target: String,
    pub variant: ProtocolVariant,
    pub stats: RelayStats,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub video: VideoStatus,
    pub audio: AudioStatus,
    pub viewers: Vec<ViewerStats>,
    pub relay: RelayStatus,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let frames = state.gateway.frames();
    let audio = state.gateway.audio();

    Json(StatusResponse {
        video: {
            let latest = frames.current();
            VideoStatus {
                state: frames.state(),
                stats: frames.stats(),
                generation: latest.as_ref().map(|frame| frame.sequence),
                last_frame_age_ms: latest.map(|frame| frame.age().as_millis() as u64),
            }
        },
        audio: AudioStatus {
            state: audio.state(),
            stats: audio.stats(),
            format: audio.format(),
            subscribers: audio.subscriber_count(),
        },
        viewers: state.gateway.viewers().stats(),
        relay: RelayStatus {
            target: state.relay.target().to_string(),
            variant: state.relay.variant(),
            stats: state.relay.stats(),
        },
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<AppConfig> {
    Json((*state.config.get()).clone())
}

// ============================================================================
// Video
// ============================================================================

#[derive(Deserialize)]
pub struct MjpegStreamQuery {
    pub client_id: Option<String>,
}

/// Multipart JPEG stream, one part per newest frame
pub async fn mjpeg_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MjpegStreamQuery>,
) -> Response {
    let client_id = query
        .client_id
        .filter(|id| !id.is_empty() && id.len() <= MAX_CLIENT_ID_LEN)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let timeout = state.config.get().video.frame_timeout();
    let body = state.gateway.mjpeg_stream(client_id, timeout);

    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={}", MJPEG_BOUNDARY),
            ),
            (
                header::CACHE_CONTROL,
                "no-cache, no-store, must-revalidate".to_string(),
            ),
            (header::PRAGMA, "no-cache".to_string()),
            (header::EXPIRES, "0".to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Latest frame as a single JPEG
pub async fn snapshot(State(state): State<Arc<AppState>>) -> Response {
    match state.gateway.frames().current() {
        Some(frame) if !frame.is_empty() => (
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            Body::from(frame.data_bytes()),
        )
            .into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "No frame available").into_response(),
    }
}

// ============================================================================
// Controller mappings
// ============================================================================

#[derive(Serialize)]
pub struct MappingResponse {
    pub profile: String,
    /// False when the profile has never been saved and defaults are shown
    pub stored: bool,
    pub mapping: Mapping,
}

pub async fn mapping_get(
    State(state): State<Arc<AppState>>,
    Path(profile): Path<String>,
) -> Result<Json<MappingResponse>> {
    validate_profile(&profile)?;
    let stored = state.config.load_mapping(&profile).await?;

    Ok(Json(MappingResponse {
        stored: stored.is_some(),
        mapping: stored.unwrap_or_default(),
        profile,
    }))
}

pub async fn mapping_reset(
    State(state): State<Arc<AppState>>,
    Path(profile): Path<String>,
) -> Result<Json<MappingResponse>> {
    validate_profile(&profile)?;
    let mapping = session::reset_profile(&state.config, &state.remaps, &profile).await?;
    tracing::info!("Mapping for profile '{}' reset over HTTP", profile);

    Ok(Json(MappingResponse {
        profile,
        stored: true,
        mapping,
    }))
}

pub async fn mapping_delete(
    State(state): State<Arc<AppState>>,
    Path(profile): Path<String>,
) -> Result<Json<MappingResponse>> {
    validate_profile(&profile)?;
    session::delete_profile(&state.config, &state.remaps, &profile).await?;
    tracing::info!("Mapping for profile '{}' deleted over HTTP", profile);

    Ok(Json(MappingResponse {
        profile,
        stored: false,
        mapping: Mapping::default(),
    }))
}

/// Profile names are path segments and mapping table keys
pub(crate) fn validate_profile(profile: &str) -> Result<()> {
    if profile.is_empty() || profile.len() > MAX_CLIENT_ID_LEN {
        return Err(AppError::BadRequest(format!(
            "Profile name must be 1-{} characters",
            MAX_CLIENT_ID_LEN
        )));
    }
    Ok(())
}
