use std::path::Path;

use resizer_core::{
    run_resize_with_telemetry, v1, validate_request, CoreError, ErrorCode, ErrorInfo, PlatformTarget, ResizeBackend,
};
use resizer_runtime::{config_from_env, LocalResizeBackend};
use resizer_storage::resolve_output_root;
use resizer_telemetry::sink_from_env;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

uniffi::setup_scaffolding!();

pub const RESIZE_ACTION: &str = "resize";

#[derive(Debug, Error, uniffi::Error)]
pub enum FfiError {
    #[error("invalid-argument")]
    InvalidArgument,
    #[error("resize")]
    Resize,
}

/// Cordova-style outcome of [`ResizerApi::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "kebab-case")]
pub enum PluginStatus {
    Ok,
    Error,
    InvalidAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
pub struct PluginResult {
    pub status: PluginStatus,
    pub message: Option<String>,
}

impl PluginResult {
    fn ok(message: String) -> Self {
        Self {
            status: PluginStatus::Ok,
            message: Some(message),
        }
    }

    fn failed(status: PluginStatus) -> Self {
        Self { status, message: None }
    }
}

#[derive(uniffi::Object)]
pub struct ResizerApi;

#[uniffi::export]
impl ResizerApi {
    #[uniffi::constructor]
    pub fn new() -> Self {
        Self
    }

    /// Takes a camelCase `ResizeRequest` and answers with either a
    /// `ResizeResponse` or an `ErrorInfo` object.
    pub fn resize_v1_json(&self, request_json: String) -> String {
        let request: v1::ResizeRequest = match serde_json::from_str(&request_json) {
            Ok(request) => request,
            Err(err) => {
                return error_json(&ErrorInfo {
                    code: ErrorCode::InvalidRequest,
                    message: format!("invalid request json: {}", err),
                })
            }
        };
        let result = LocalResizeBackend::from_env()
            .and_then(|backend| resize_with_backend(&backend, &request, PlatformTarget::Cli));
        match result {
            Ok(response) => serde_json::to_string(&response).unwrap_or_else(|err| {
                error_json(&ErrorInfo {
                    code: ErrorCode::StorageFailure,
                    message: format!("response encode failed: {}", err),
                })
            }),
            Err(err) => error_json(&err.as_error_info()),
        }
    }

    pub fn execute(&self, action: String, args_json: String) -> PluginResult {
        let request = match plugin_request(&action, &args_json) {
            Ok(request) => request,
            Err(status) => return PluginResult::failed(status),
        };
        match LocalResizeBackend::from_env() {
            Ok(backend) => plugin_resize(&backend, &request, PlatformTarget::Android),
            Err(err) => {
                warn!(error = %err, "resize backend unavailable");
                PluginResult::failed(PluginStatus::Error)
            }
        }
    }

    pub fn default_output_root_string(&self) -> String {
        match default_output_root_string() {
            Ok(path) => path,
            Err(err) => error_json(&ErrorInfo {
                code: ErrorCode::StorageFailure,
                message: err.to_string(),
            }),
        }
    }
}

impl Default for ResizerApi {
    fn default() -> Self {
        Self::new()
    }
}

fn error_json(info: &ErrorInfo) -> String {
    serde_json::to_string(info).unwrap_or_else(|_| "{\"code\":\"invalid-request\",\"message\":\"\"}".to_string())
}

/// Resizes with the environment-configured backend.
pub fn resize_v1(request: v1::ResizeRequest, platform: PlatformTarget) -> Result<v1::ResizeResponse, FfiError> {
    validate_request(&request).map_err(map_core_error)?;
    let backend = LocalResizeBackend::from_env().map_err(map_core_error)?;
    resize_with_backend(&backend, &request, platform).map_err(map_core_error)
}

pub fn resize_with_backend<B: ResizeBackend + ?Sized>(
    backend: &B,
    request: &v1::ResizeRequest,
    platform: PlatformTarget,
) -> Result<v1::ResizeResponse, CoreError> {
    let telemetry = sink_from_env();
    let telemetry_ref = telemetry.as_ref().map(|sink| sink.as_ref());
    run_resize_with_telemetry(backend, request, platform, telemetry_ref).map(v1::ResizeResponse::from)
}

/// `action` must be `"resize"` and `args_json` a one-element array holding the
/// request object. A wrong argument count is `InvalidAction`; every other
/// failure is `Error`.
pub fn execute_with_backend<B: ResizeBackend + ?Sized>(
    backend: &B,
    action: &str,
    args_json: &str,
    platform: PlatformTarget,
) -> PluginResult {
    match plugin_request(action, args_json) {
        Ok(request) => plugin_resize(backend, &request, platform),
        Err(status) => PluginResult::failed(status),
    }
}

pub fn plugin_request(action: &str, args_json: &str) -> Result<v1::ResizeRequest, PluginStatus> {
    if action != RESIZE_ACTION {
        warn!(action, "unknown plugin action");
        return Err(PluginStatus::Error);
    }
    parse_plugin_args(args_json)
}

fn plugin_resize<B: ResizeBackend + ?Sized>(backend: &B, request: &v1::ResizeRequest, platform: PlatformTarget) -> PluginResult {
    match resize_with_backend(backend, request, platform) {
        Ok(response) => PluginResult::ok(response.uri),
        Err(err) => {
            warn!(code = ?err.code(), error = %err, "plugin resize failed");
            PluginResult::failed(PluginStatus::Error)
        }
    }
}

pub fn parse_plugin_args(args_json: &str) -> Result<v1::ResizeRequest, PluginStatus> {
    let args: Vec<serde_json::Value> = serde_json::from_str(args_json).map_err(|err| {
        warn!(error = %err, "plugin arguments are not a json array");
        PluginStatus::Error
    })?;
    let [request] = <[serde_json::Value; 1]>::try_from(args).map_err(|args| {
        warn!(count = args.len(), "plugin expects exactly one argument");
        PluginStatus::InvalidAction
    })?;
    serde_json::from_value(request).map_err(|err| {
        warn!(error = %err, "plugin argument is not a resize request");
        PluginStatus::Error
    })
}

pub fn default_output_root_string() -> Result<String, FfiError> {
    let config = config_from_env();
    let root = resolve_output_root(config.output_root.as_deref().map(Path::new)).map_err(|_| FfiError::Resize)?;
    Ok(root.display().to_string())
}

fn map_core_error(err: CoreError) -> FfiError {
    match err.code() {
        ErrorCode::InvalidRequest | ErrorCode::PreconditionViolation => FfiError::InvalidArgument,
        _ => FfiError::Resize,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;

    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use resizer_core::RuntimeConfig;

    use super::*;

    fn backend(root: &Path) -> LocalResizeBackend {
        LocalResizeBackend::from_config(&RuntimeConfig {
            output_root: Some(root.join("out").to_string_lossy().into_owned()),
            content_index: Some(root.join("index.json").to_string_lossy().into_owned()),
            ..RuntimeConfig::default()
        })
        .expect("backend")
    }

    fn sample_png(path: &Path) {
        let img = ImageBuffer::from_pixel(40, 20, Rgb([200u8, 100, 50]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode");
        fs::write(path, bytes).expect("write");
    }

    fn args(uri: &Path) -> String {
        serde_json::json!([{
            "uri": uri.to_string_lossy(),
            "folderName": "plugin",
            "quality": 70,
            "width": 20,
            "height": 0
        }])
        .to_string()
    }

    #[test]
    fn execute_resize_returns_file_locator() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("in.png");
        sample_png(&src);
        let result = execute_with_backend(&backend(dir.path()), "resize", &args(&src), PlatformTarget::Android);
        assert_eq!(result.status, PluginStatus::Ok);
        let uri = result.message.expect("locator");
        assert!(uri.starts_with("file://"));
        assert!(uri.contains("/plugin/"));
    }

    #[test]
    fn unknown_action_is_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("in.png");
        let result = execute_with_backend(&backend(dir.path()), "crop", &args(&src), PlatformTarget::Android);
        assert_eq!(result, PluginResult::failed(PluginStatus::Error));
    }

    #[test]
    fn wrong_argument_count_is_invalid_action() {
        assert_eq!(parse_plugin_args("[]").expect_err("empty"), PluginStatus::InvalidAction);
        assert_eq!(parse_plugin_args("[{}, {}]").expect_err("two"), PluginStatus::InvalidAction);
    }

    #[test]
    fn malformed_arguments_are_errors() {
        assert_eq!(parse_plugin_args("{\"uri\":\"a\"}").expect_err("not array"), PluginStatus::Error);
        assert_eq!(parse_plugin_args("not json").expect_err("garbage"), PluginStatus::Error);
        assert_eq!(
            parse_plugin_args(r#"[{"uri":"a.png","quality":1,"width":1,"height":1}]"#).expect_err("missing folderName"),
            PluginStatus::Error
        );
    }

    #[test]
    fn failed_resize_is_error_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.png");
        let result = execute_with_backend(&backend(dir.path()), "resize", &args(&missing), PlatformTarget::Ios);
        assert_eq!(result.status, PluginStatus::Error);
        assert_eq!(result.message, None);
    }

    #[test]
    fn core_errors_collapse_to_two_ffi_kinds() {
        assert!(matches!(
            map_core_error(CoreError::InvalidRequest("q".to_string())),
            FfiError::InvalidArgument
        ));
        assert!(matches!(map_core_error(CoreError::CodecFailure("x".to_string())), FfiError::Resize));
    }

    #[test]
    fn bad_json_request_reports_invalid_request_code() {
        let api = ResizerApi::new();
        let body: serde_json::Value = serde_json::from_str(&api.resize_v1_json("{".to_string())).expect("json");
        assert_eq!(body["code"], "invalid-request");
    }
}
