//! Web control panel.
//!
//! A small JSON API around a [`Supervisor`]: start and stop the rotation,
//! follow its progress, push a one-off text, and edit the configuration file.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use blockclock_rotate::panel::{router, Panel};
//! use blockclock_rotate::HttpDeviceClient;
//!
//! let panel = Arc::new(Panel::new(HttpDeviceClient::new(), "config/blockclock.yaml"));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:5010").await?;
//! axum::serve(listener, router(panel)).await?;
//! ```
//!
//! | Endpoint | Method | Purpose |
//! |----------|--------|---------|
//! | `/status` | GET | Whether a rotation is running |
//! | `/start`, `/stop` | POST | Control the rotation |
//! | `/monitoring_status` | GET | Current phase with elapsed and expected time |
//! | `/sync_status` | GET | Whether the run is synchronized with the device |
//! | `/logs` | GET | Recent events as log lines |
//! | `/current_display` | GET | Classified display of the primary device |
//! | `/send_text` | POST | One-off text, rate limited |
//! | `/rate_limit_status` | GET | Whether a manual text can be sent now |
//! | `/config` | GET, POST | Read or replace the configuration |
//! | `/check_device` | POST | Liveness check for an address |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::client::DeviceApi;
use crate::config::{Device, RotationConfig};
use crate::events::{format_mm_ss, Phase};
use crate::supervisor::Supervisor;
use crate::Error;

/// Shared state behind the router.
#[derive(Debug)]
pub struct Panel<A> {
    supervisor: Supervisor<A>,
    config_path: PathBuf,
}

impl<A> Panel<A>
where
    A: DeviceApi + Clone + 'static,
{
    /// Create a panel driving devices through `api`, configured from `config_path`.
    pub fn new(api: A, config_path: impl Into<PathBuf>) -> Self {
        Self {
            supervisor: Supervisor::new(api),
            config_path: config_path.into(),
        }
    }

    /// The supervisor owning the rotation run.
    pub fn supervisor(&self) -> &Supervisor<A> {
        &self.supervisor
    }

    /// Path of the configuration file.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn load_config(&self) -> Result<RotationConfig, Error> {
        RotationConfig::load_or_create(&self.config_path)
    }
}

/// Build the control panel router.
pub fn router<A>(panel: Arc<Panel<A>>) -> Router
where
    A: DeviceApi + Clone + 'static,
{
    Router::new()
        .route("/status", get(status::<A>))
        .route("/start", post(start::<A>))
        .route("/stop", post(stop::<A>))
        .route("/monitoring_status", get(monitoring_status::<A>))
        .route("/sync_status", get(sync_status::<A>))
        .route("/logs", get(logs::<A>))
        .route("/current_display", get(current_display::<A>))
        .route("/send_text", post(send_text::<A>))
        .route("/rate_limit_status", get(rate_limit_status::<A>))
        .route("/config", get(get_config::<A>).post(save_config::<A>))
        .route("/check_device", post(check_device::<A>))
        .with_state(panel)
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_time: Option<u64>,
}

/// An [`Error`] mapped onto an HTTP status.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::AlreadyRunning | Error::NotRunning => StatusCode::CONFLICT,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Config(_) | Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::NoReachableDevices => StatusCode::SERVICE_UNAVAILABLE,
            Error::Request(_) | Error::Api { .. } => StatusCode::BAD_GATEWAY,
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let wait_time = match self.0 {
            Error::RateLimited { retry_after_secs } => Some(retry_after_secs),
            _ => None,
        };
        let body = ErrorBody {
            success: false,
            error: self.0.to_string(),
            wait_time,
        };
        (self.status(), Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// `GET /status`
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub active: bool,
}

async fn status<A>(State(panel): State<Arc<Panel<A>>>) -> Json<StatusResponse>
where
    A: DeviceApi + Clone + 'static,
{
    Json(StatusResponse {
        active: panel.supervisor.is_active(),
    })
}

/// `POST /start` and `POST /stop`
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub active: bool,
}

async fn start<A>(State(panel): State<Arc<Panel<A>>>) -> ApiResult<ControlResponse>
where
    A: DeviceApi + Clone + 'static,
{
    let config = panel.load_config()?;
    panel.supervisor.start(config)?;
    Ok(Json(ControlResponse {
        success: true,
        active: true,
    }))
}

async fn stop<A>(State(panel): State<Arc<Panel<A>>>) -> ApiResult<ControlResponse>
where
    A: DeviceApi + Clone + 'static,
{
    panel.supervisor.stop()?;
    Ok(Json(ControlResponse {
        success: true,
        active: false,
    }))
}

/// `GET /monitoring_status`
#[derive(Debug, Serialize)]
pub struct MonitoringStatus {
    pub active: bool,
    pub phase: Option<Phase>,
    pub message: String,
    /// Time in the current phase, `MM:SS`
    pub elapsed: String,
    /// Expected length of the current phase, `MM:SS`, empty when unknown
    pub expected: String,
    pub cycles_completed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn monitoring_status<A>(State(panel): State<Arc<Panel<A>>>) -> Json<MonitoringStatus>
where
    A: DeviceApi + Clone + 'static,
{
    let status = panel.supervisor.with_run(|run| run.status());
    Json(match status {
        Some(status) => MonitoringStatus {
            active: status.active,
            phase: status.phase,
            message: status.message,
            elapsed: format_mm_ss(status.phase_elapsed),
            expected: status.expected.map(format_mm_ss).unwrap_or_default(),
            cycles_completed: status.cycles_completed,
            error: status.error,
        },
        None => MonitoringStatus {
            active: false,
            phase: None,
            message: String::new(),
            elapsed: format_mm_ss(Default::default()),
            expected: String::new(),
            cycles_completed: 0,
            error: None,
        },
    })
}

/// `GET /sync_status`
#[derive(Debug, Serialize)]
pub struct SyncStatus {
    pub active: bool,
    pub sync_ready: bool,
}

async fn sync_status<A>(State(panel): State<Arc<Panel<A>>>) -> Json<SyncStatus>
where
    A: DeviceApi + Clone + 'static,
{
    let sync_ready = panel
        .supervisor
        .with_run(|run| run.is_active() && run.sync_ready())
        .unwrap_or(false);
    Json(SyncStatus {
        active: panel.supervisor.is_active(),
        sync_ready,
    })
}

/// `GET /logs`
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub success: bool,
    pub logs: String,
}

async fn logs<A>(State(panel): State<Arc<Panel<A>>>) -> Json<LogsResponse>
where
    A: DeviceApi + Clone + 'static,
{
    let lines: Vec<String> = panel
        .supervisor
        .with_run(|run| run.recent_events().iter().map(|e| e.log_line()).collect())
        .unwrap_or_default();

    let logs = if lines.is_empty() {
        "No log entries yet. Start the text rotation to generate logs.".to_string()
    } else {
        lines.join("\n")
    };
    Json(LogsResponse {
        success: true,
        logs,
    })
}

/// `GET /current_display`
#[derive(Debug, Serialize)]
pub struct CurrentDisplay {
    pub success: bool,
    pub display_text: String,
    pub display_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn current_display<A>(State(panel): State<Arc<Panel<A>>>) -> Json<CurrentDisplay>
where
    A: DeviceApi + Clone + 'static,
{
    Json(match panel.supervisor.current_display().await {
        None => CurrentDisplay {
            success: true,
            display_text: "--------".to_string(),
            display_type: "Inactive - Start rotation to see display".to_string(),
            error: None,
        },
        Some(Ok(display)) => CurrentDisplay {
            success: true,
            display_text: display.label,
            display_type: display.category.display_name().to_string(),
            error: None,
        },
        Some(Err(e)) => CurrentDisplay {
            success: false,
            display_text: "ERROR".to_string(),
            display_type: "Connection failed".to_string(),
            error: Some(e.to_string()),
        },
    })
}

/// `POST /send_text` body
#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    #[serde(default)]
    pub text: String,
}

/// `POST /send_text` response
#[derive(Debug, Serialize)]
pub struct SendTextResponse {
    pub success: bool,
    pub message: String,
    /// Devices that accepted the text
    pub devices: usize,
}

async fn send_text<A>(
    State(panel): State<Arc<Panel<A>>>,
    Json(request): Json<SendTextRequest>,
) -> ApiResult<SendTextResponse>
where
    A: DeviceApi + Clone + 'static,
{
    let text = request.text.trim();
    let devices = panel.supervisor.send_manual_text(text).await?;
    Ok(Json(SendTextResponse {
        success: true,
        message: format!(
            "Text \"{}\" sent to {} device(s), rotation resynchronizing",
            text, devices
        ),
        devices,
    }))
}

/// `GET /rate_limit_status`
#[derive(Debug, Serialize)]
pub struct RateLimitStatus {
    pub can_send: bool,
    /// Seconds until the next manual text is accepted
    pub wait_time: u64,
}

async fn rate_limit_status<A>(State(panel): State<Arc<Panel<A>>>) -> Json<RateLimitStatus>
where
    A: DeviceApi + Clone + 'static,
{
    let wait = panel.supervisor.manual_text_wait();
    Json(RateLimitStatus {
        can_send: wait.is_none(),
        wait_time: wait.map(|w| w.as_secs_f64().ceil() as u64).unwrap_or(0),
    })
}

async fn get_config<A>(State(panel): State<Arc<Panel<A>>>) -> ApiResult<RotationConfig>
where
    A: DeviceApi + Clone + 'static,
{
    Ok(Json(panel.load_config()?))
}

/// `POST /config` response
#[derive(Debug, Serialize)]
pub struct SaveConfigResponse {
    pub success: bool,
    /// Whether a running rotation keeps its old settings until restarted
    pub restart_required: bool,
}

async fn save_config<A>(
    State(panel): State<Arc<Panel<A>>>,
    Json(config): Json<RotationConfig>,
) -> ApiResult<SaveConfigResponse>
where
    A: DeviceApi + Clone + 'static,
{
    config.save(&panel.config_path)?;
    tracing::info!("Configuration saved to {}", panel.config_path.display());
    Ok(Json(SaveConfigResponse {
        success: true,
        restart_required: panel.supervisor.is_active(),
    }))
}

/// `POST /check_device` body
#[derive(Debug, Deserialize)]
pub struct CheckDeviceRequest {
    #[serde(alias = "ip")]
    pub address: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// `POST /check_device` response
#[derive(Debug, Serialize)]
pub struct CheckDeviceResponse {
    pub success: bool,
    pub reachable: bool,
    pub message: String,
}

async fn check_device<A>(
    State(panel): State<Arc<Panel<A>>>,
    Json(request): Json<CheckDeviceRequest>,
) -> ApiResult<CheckDeviceResponse>
where
    A: DeviceApi + Clone + 'static,
{
    let address = request.address.trim();
    if address.is_empty() {
        return Err(Error::Config("address is required".into()).into());
    }

    let mut device = Device::new(address, address);
    device.password = request.password;
    let reachable = panel.supervisor.api().ping(&device).await;

    Ok(Json(CheckDeviceResponse {
        success: true,
        reachable,
        message: if reachable {
            "Device is reachable".to_string()
        } else {
            "Device is not reachable".to_string()
        },
    }))
}
