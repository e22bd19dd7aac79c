//! HTTP surface of the relay.
//!
//! - `GET /health`: liveness and connected device count
//! - `GET /api/cameras`: every registered camera
//! - `GET /api/devices/{id}/videos`: paginated recording listing
//! - `GET|HEAD /api/devices/{id}/videos/{filename}`: recording bytes, with
//!   `Range` support
//! - `GET /api/ws/device/{device_id}`: device tunnel (WebSocket)
//!
//! `{id}` is tried as a camera id first and as a device id second.

use std::sync::Arc;

use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response as HttpResponse};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use camrelay_core::DEFAULT_PAGE_SIZE;
use camrelay_protocol::{Envelope, ListVideosQuery, Request, Response, VideoPage};

use crate::bridge::{FileReply, FileRequest, parse_range};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::registry::{CameraEntry, DeviceConnection, Registry};
use crate::tunnel;

/// Largest `page_size` a listing accepts.
pub const MAX_PAGE_SIZE: i64 = 1000;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Live device connections.
    pub registry: Arc<Registry>,
    /// Relay settings (timeouts, token).
    pub config: Arc<RelayConfig>,
}

impl AppState {
    /// Creates handler state around an existing registry.
    pub fn new(registry: Arc<Registry>, config: RelayConfig) -> Self {
        Self {
            registry,
            config: Arc::new(config),
        }
    }

    async fn device(&self, id: &str) -> Result<Arc<DeviceConnection>, ApiError> {
        self.registry
            .lookup(id)
            .await
            .ok_or_else(|| RelayError::device_not_found(id).into())
    }
}

/// Builds the relay router.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/health", get(health))
        .route("/api/cameras", get(list_cameras))
        .route("/api/devices/{device_id}/videos", get(list_videos))
        .route(
            "/api/devices/{device_id}/videos/{filename}",
            get(stream_video).head(stream_video),
        )
        .route("/api/ws/device/{device_id}", get(tunnel::device_socket))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([
            header::ACCEPT_RANGES,
            header::CONTENT_LENGTH,
            header::CONTENT_RANGE,
        ])
}

/// `GET /health` body.
#[derive(Debug, Serialize)]
pub struct Health {
    /// Always `"ok"`.
    pub status: &'static str,
    /// Number of authenticated tunnels.
    pub connected_devices: usize,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        connected_devices: state.registry.device_count().await,
    })
}

/// `GET /api/cameras` body.
#[derive(Debug, Serialize)]
pub struct CameraListing {
    /// One entry per `(device, camera)` pair.
    pub cameras: Vec<CameraEntry>,
    /// Number of entries.
    pub total: usize,
}

async fn list_cameras(State(state): State<AppState>) -> Json<CameraListing> {
    let cameras = state.registry.list_all_cameras().await;
    Json(CameraListing {
        total: cameras.len(),
        cameras,
    })
}

/// Query string of the listing route, validated by [`ListParams::into_query`].
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// `YYYYmmdd`.
    pub date: Option<String>,
    /// 0-23.
    pub hour: Option<i64>,
    /// 1 or more, default 1.
    pub page: Option<i64>,
    /// 1 to [`MAX_PAGE_SIZE`], default 60.
    pub page_size: Option<i64>,
}

impl ListParams {
    /// Validates the parameters and builds the `LIST_VIDEOS` payload.
    pub fn into_query(self, camera: &str) -> Result<ListVideosQuery, ApiError> {
        let hour = match self.hour {
            None => None,
            Some(hour @ 0..=23) => Some(hour as u8),
            Some(hour) => {
                return Err(ApiError::invalid_query(format!(
                    "hour must be 0-23, got {hour}"
                )));
            }
        };
        let page = match self.page.unwrap_or(1) {
            page @ 1..=0xFFFF_FFFF => page as u32,
            page => {
                return Err(ApiError::invalid_query(format!(
                    "page must be at least 1, got {page}"
                )));
            }
        };
        let page_size = match self.page_size.unwrap_or(i64::from(DEFAULT_PAGE_SIZE)) {
            size @ 1..=MAX_PAGE_SIZE => size as u32,
            size => {
                return Err(ApiError::invalid_query(format!(
                    "page_size must be 1-{MAX_PAGE_SIZE}, got {size}"
                )));
            }
        };

        let mut query = ListVideosQuery::new(camera).page(page, page_size);
        if let Some(date) = self.date.filter(|date| !date.is_empty()) {
            query = query.date(date);
        }
        if let Some(hour) = hour {
            query = query.hour(hour);
        }
        Ok(query)
    }
}

async fn list_videos(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<VideoPage>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::invalid_query(e.body_text()))?;
    let query = params.into_query(&device_id)?;
    let conn = state.device(&device_id).await?;

    let request = Envelope::request(Request::ListVideos(query));
    let response = conn
        .correlator()
        .send(request, state.config.request_timeout)
        .await
        .inspect_err(|e| {
            error!(device_id = %device_id, error = %e, "Error listing videos");
        })?;

    match response {
        Response::Videos(page) => Ok(Json(page)),
        Response::Error(body) => Err(RelayError::Device(body).into()),
        Response::File(_) => Err(RelayError::unexpected("READ_FILE_RES").into()),
    }
}

async fn stream_video(
    State(state): State<AppState>,
    Path((device_id, filename)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
) -> Result<FileReply, ApiError> {
    let conn = state.device(&device_id).await?;

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let range = parse_range(value);
            if range.is_none() {
                warn!(range = %value, "Ignoring unsupported Range header");
            }
            range
        });

    let request = FileRequest {
        camera: device_id,
        filename,
        range,
        head: method == Method::HEAD,
    };

    let envelope = Envelope::request(Request::ReadFile(request.to_read_request()));
    let (response, chunks) = conn
        .correlator()
        .send_with_binary(
            envelope,
            state.config.request_timeout,
            state.config.transfer_timeout,
        )
        .await
        .inspect_err(|e| {
            error!(
                device_id = %request.camera,
                filename = %request.filename,
                error = %e,
                "Error streaming video"
            )
        })?;

    Ok(request.assemble(response, chunks)?)
}

/// Error returned by HTTP handlers, rendered as `{"detail": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    /// A relay or device failure.
    Relay(RelayError),
    /// Query string failed validation.
    InvalidQuery(String),
}

impl ApiError {
    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidQuery(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Relay(err) => match err {
                RelayError::DeviceNotFound { .. } => StatusCode::NOT_FOUND,
                RelayError::RequestTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                RelayError::DeviceDisconnected { .. }
                | RelayError::IncompleteTransfer { .. }
                | RelayError::TransferOverrun { .. }
                | RelayError::UnexpectedResponse { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Human-readable message for the `detail` field.
    pub fn detail(&self) -> String {
        match self {
            Self::InvalidQuery(message) => message.clone(),
            Self::Relay(RelayError::DeviceNotFound { .. }) => {
                "Device or camera not found".to_string()
            }
            Self::Relay(RelayError::Device(body)) => body.message.clone(),
            Self::Relay(err) => err.to_string(),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self::Relay(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> HttpResponse {
        let body = serde_json::json!({ "detail": self.detail() });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use camrelay_protocol::{ErrorBody, ErrorCode};

    fn params(hour: Option<i64>, page: Option<i64>, page_size: Option<i64>) -> ListParams {
        ListParams {
            date: None,
            hour,
            page,
            page_size,
        }
    }

    #[test]
    fn list_params_defaults() {
        let query = ListParams::default().into_query("cam1").unwrap();
        assert_eq!(query.camera, "cam1");
        assert_eq!(query.page, Some(1));
        assert_eq!(query.page_size, Some(60));
        assert_eq!(query.hour, None);
        assert_eq!(query.date, None);
    }

    #[test]
    fn list_params_pass_filters_through() {
        let query = ListParams {
            date: Some("20240115".to_string()),
            hour: Some(23),
            page: Some(3),
            page_size: Some(1000),
        }
        .into_query("cam1")
        .unwrap();

        assert_eq!(query.date.as_deref(), Some("20240115"));
        assert_eq!(query.hour, Some(23));
        assert_eq!(query.page, Some(3));
        assert_eq!(query.page_size, Some(1000));
    }

    #[test]
    fn list_params_reject_out_of_range_values() {
        for bad in [
            params(Some(24), None, None),
            params(Some(-1), None, None),
            params(None, Some(0), None),
            params(None, None, Some(0)),
            params(None, None, Some(1001)),
        ] {
            let err = bad.into_query("cam1").unwrap_err();
            assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        }
    }

    #[test]
    fn empty_date_is_no_filter() {
        let query = ListParams {
            date: Some(String::new()),
            ..Default::default()
        }
        .into_query("cam1")
        .unwrap();
        assert_eq!(query.date, None);
    }

    #[test]
    fn error_status_mapping() {
        let cases = [
            (RelayError::device_not_found("x"), StatusCode::NOT_FOUND),
            (
                RelayError::RequestTimeout {
                    request_id: "r".into(),
                    timeout: Duration::from_secs(60),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (RelayError::disconnected("d"), StatusCode::BAD_GATEWAY),
            (
                RelayError::IncompleteTransfer {
                    expected: 10,
                    received: 4,
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                RelayError::TransferOverrun {
                    expected: 4,
                    received: 10,
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                RelayError::Device(ErrorBody::new(ErrorCode::FileNotFound, "gone")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn error_detail_messages() {
        assert_eq!(
            ApiError::from(RelayError::device_not_found("cam9")).detail(),
            "Device or camera not found"
        );
        assert_eq!(
            ApiError::from(RelayError::Device(ErrorBody::new(
                ErrorCode::InvalidRange,
                "Invalid range: 0-2000 for file size 1000"
            )))
            .detail(),
            "Invalid range: 0-2000 for file size 1000"
        );
    }

    #[test]
    fn error_renders_detail_body() {
        let response = ApiError::invalid_query("hour must be 0-23, got 24").into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
    }

    #[test]
    fn health_shape() {
        let health = Health {
            status: "ok",
            connected_devices: 2,
        };
        insta::assert_json_snapshot!(health, @r###"
        {
          "status": "ok",
          "connected_devices": 2
        }
        "###);
    }

    #[test]
    fn camera_listing_shape() {
        let listing = CameraListing {
            cameras: vec![CameraEntry {
                device_id: "pi-garage".into(),
                camera_id: "cam1".into(),
            }],
            total: 1,
        };
        insta::assert_json_snapshot!(listing, @r###"
        {
          "cameras": [
            {
              "device_id": "pi-garage",
              "camera_id": "cam1"
            }
          ],
          "total": 1
        }
        "###);
    }
}
