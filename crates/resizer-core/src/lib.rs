use std::path::{Component, Path};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod geometry;

pub use geometry::{
    decode_target, resolve, resolve_raw, sample_size, sample_size_raw, Dimensions, RequestedSize, SampleFactor, ScaleRequest,
    ScaleResult,
};

pub const MAX_QUALITY: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformTarget {
    Cli,
    Tauri,
    Android,
    Ios,
}

/// A request that passed validation, ready for a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeJob {
    pub uri: String,
    pub folder_name: String,
    pub quality: u8,
    pub requested: RequestedSize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeOutcome {
    pub uri: String,
    pub native: Dimensions,
    pub output: ScaleResult,
    pub sample_factor: SampleFactor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryEventType {
    ResizeStart,
    ProbeSuccess,
    ResizeSuccess,
    ResizeError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_type: TelemetryEventType,
    pub platform: PlatformTarget,
    pub duration_ms: Option<u64>,
    pub detail: Option<String>,
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Everything the resize operation delegates: stream resolution, codec work and
/// persistence. `Image` is whatever pixel buffer the backend decodes into.
pub trait ResizeBackend: Send + Sync {
    type Image;

    /// Native dimensions read without decoding pixel data.
    fn probe(&self, uri: &str) -> Result<Dimensions, CoreError>;

    /// Decode at roughly `native / sample` resolution, never smaller.
    fn decode(&self, uri: &str, sample: SampleFactor) -> Result<Self::Image, CoreError>;

    fn resize(&self, image: Self::Image, target: ScaleResult) -> Result<Self::Image, CoreError>;

    /// Encode and persist under `folder_name`, returning a locator for the file.
    fn store(&self, image: &Self::Image, folder_name: &str, quality: u8) -> Result<String, CoreError>;
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),
    #[error("could not resolve source: {0}")]
    ResolutionFailure(String),
    #[error("codec error: {0}")]
    CodecFailure(String),
    #[error("storage error: {0}")]
    StorageFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    InvalidRequest,
    PreconditionViolation,
    ResolutionFailure,
    CodecFailure,
    StorageFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::PreconditionViolation(_) => ErrorCode::PreconditionViolation,
            Self::ResolutionFailure(_) => ErrorCode::ResolutionFailure,
            Self::CodecFailure(_) => ErrorCode::CodecFailure,
            Self::StorageFailure(_) => ErrorCode::StorageFailure,
        }
    }

    pub fn as_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub output_root: Option<String>,
    pub assets_root: Option<String>,
    pub content_index: Option<String>,
    pub http_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            output_root: None,
            assets_root: None,
            content_index: None,
            http_timeout_ms: 30_000,
        }
    }
}

/// Blank strings and a zero timeout in `overrides` keep the default.
pub fn resolve_runtime_config(overrides: RuntimeConfig) -> RuntimeConfig {
    let mut cfg = RuntimeConfig::default();
    if let Some(root) = non_blank(overrides.output_root) {
        cfg.output_root = Some(root);
    }
    if let Some(root) = non_blank(overrides.assets_root) {
        cfg.assets_root = Some(root);
    }
    if let Some(index) = non_blank(overrides.content_index) {
        cfg.content_index = Some(index);
    }
    if overrides.http_timeout_ms > 0 {
        cfg.http_timeout_ms = overrides.http_timeout_ms;
    }
    cfg
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub mod v1 {
    use super::*;

    /// Wire shape of a resize call. `width`/`height` <= 0 mean "unspecified".
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ResizeRequest {
        pub uri: String,
        pub folder_name: String,
        pub quality: i32,
        pub width: i32,
        pub height: i32,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ResizeResponse {
        pub uri: String,
        pub width: u32,
        pub height: u32,
        pub sample_factor: u32,
    }

    impl From<ResizeOutcome> for ResizeResponse {
        fn from(outcome: ResizeOutcome) -> Self {
            Self {
                uri: outcome.uri,
                width: outcome.output.width(),
                height: outcome.output.height(),
                sample_factor: outcome.sample_factor.get(),
            }
        }
    }
}

pub fn validate_request(request: &v1::ResizeRequest) -> Result<ResizeJob, CoreError> {
    let uri = request.uri.trim();
    if uri.is_empty() {
        return Err(CoreError::InvalidRequest("uri must not be empty".to_string()));
    }
    let folder_name = request.folder_name.trim();
    if folder_name.is_empty() {
        return Err(CoreError::InvalidRequest("folderName must not be empty".to_string()));
    }
    let escapes = Path::new(folder_name)
        .components()
        .any(|component| !matches!(component, Component::Normal(_)));
    if escapes {
        return Err(CoreError::InvalidRequest(format!(
            "folderName '{}' must be a relative path without '..'",
            folder_name
        )));
    }
    let quality = u8::try_from(request.quality)
        .ok()
        .filter(|q| i32::from(*q) <= MAX_QUALITY)
        .ok_or_else(|| CoreError::InvalidRequest(format!("quality {} is outside 0..=100", request.quality)))?;
    Ok(ResizeJob {
        uri: uri.to_string(),
        folder_name: folder_name.to_string(),
        quality,
        requested: RequestedSize::from_raw(i64::from(request.width), i64::from(request.height)),
    })
}

pub fn run_resize<B: ResizeBackend + ?Sized>(backend: &B, request: &v1::ResizeRequest) -> Result<ResizeOutcome, CoreError> {
    run_resize_with_telemetry(backend, request, PlatformTarget::Cli, None)
}

pub fn run_resize_with_telemetry<B: ResizeBackend + ?Sized>(
    backend: &B,
    request: &v1::ResizeRequest,
    platform: PlatformTarget,
    telemetry: Option<&dyn TelemetrySink>,
) -> Result<ResizeOutcome, CoreError> {
    let job = validate_request(request)?;
    let start = Instant::now();
    let emit = |event_type: TelemetryEventType, duration_ms: Option<u64>, detail: Option<String>| {
        if let Some(sink) = telemetry {
            sink.emit(TelemetryEvent {
                event_type,
                platform,
                duration_ms,
                detail,
            });
        }
    };
    emit(TelemetryEventType::ResizeStart, None, Some(format!("uri={}", job.uri)));

    let result = execute(backend, &job, &|native: Dimensions| {
        emit(
            TelemetryEventType::ProbeSuccess,
            Some(start.elapsed().as_millis() as u64),
            Some(format!("native={}x{}", native.width(), native.height())),
        )
    });

    match &result {
        Ok(outcome) => emit(
            TelemetryEventType::ResizeSuccess,
            Some(start.elapsed().as_millis() as u64),
            Some(format!(
                "native={}x{},output={}x{},sample={}",
                outcome.native.width(),
                outcome.native.height(),
                outcome.output.width(),
                outcome.output.height(),
                outcome.sample_factor.get()
            )),
        ),
        Err(err) => emit(
            TelemetryEventType::ResizeError,
            Some(start.elapsed().as_millis() as u64),
            Some(err.to_string()),
        ),
    }
    result
}

fn execute<B: ResizeBackend + ?Sized>(
    backend: &B,
    job: &ResizeJob,
    on_probe: &dyn Fn(Dimensions),
) -> Result<ResizeOutcome, CoreError> {
    let native = backend.probe(&job.uri)?;
    on_probe(native);
    let output = resolve(native, job.requested);
    let sample_factor = sample_size(native, decode_target(native, job.requested));
    let decoded = backend.decode(&job.uri, sample_factor)?;
    let resized = backend.resize(decoded, output)?;
    let uri = backend.store(&resized, &job.folder_name, job.quality)?;
    Ok(ResizeOutcome {
        uri,
        native,
        output,
        sample_factor,
    })
}
