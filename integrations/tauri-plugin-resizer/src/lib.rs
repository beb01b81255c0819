use anyhow::{Context, Result};
use resizer_core::{run_resize_with_telemetry, v1, PlatformTarget, ResizeBackend, RuntimeConfig};
use resizer_runtime::{config_from_env, LocalResizeBackend};
use resizer_telemetry::sink_from_env;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_QUALITY: i32 = 85;
pub const DEFAULT_FOLDER: &str = "resized";

/// Command payload. Omitted sizes mean "derive from the source".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TauriResizeRequest {
    pub uri: String,
    pub folder_name: Option<String>,
    pub quality: Option<i32>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub output_root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TauriResizeResponse {
    pub uri: String,
    pub width: u32,
    pub height: u32,
}

impl From<TauriResizeRequest> for v1::ResizeRequest {
    fn from(request: TauriResizeRequest) -> Self {
        Self {
            uri: request.uri,
            folder_name: request.folder_name.unwrap_or_else(|| DEFAULT_FOLDER.to_string()),
            quality: request.quality.unwrap_or(DEFAULT_QUALITY),
            width: request.width.unwrap_or(0),
            height: request.height.unwrap_or(0),
        }
    }
}

pub fn resize_with_backend<B: ResizeBackend + ?Sized>(backend: &B, request: TauriResizeRequest) -> Result<TauriResizeResponse> {
    let telemetry = sink_from_env();
    let telemetry_ref = telemetry.as_ref().map(|sink| sink.as_ref());
    let outcome = run_resize_with_telemetry(backend, &request.into(), PlatformTarget::Tauri, telemetry_ref)?;
    Ok(TauriResizeResponse {
        uri: outcome.uri,
        width: outcome.output.width(),
        height: outcome.output.height(),
    })
}

/// Environment config, with `outputRoot` from the payload taking precedence.
pub fn resize(request: TauriResizeRequest) -> Result<TauriResizeResponse> {
    let env_cfg = config_from_env();
    let config = resizer_core::resolve_runtime_config(RuntimeConfig {
        output_root: request.output_root.clone().or(env_cfg.output_root),
        ..env_cfg
    });
    let backend = LocalResizeBackend::from_config(&config).context("building resize backend")?;
    resize_with_backend(&backend, request)
}

pub fn resize_command(request: TauriResizeRequest) -> std::result::Result<TauriResizeResponse, String> {
    resize(request).map_err(|err| {
        warn!(error = %err, "tauri resize failed");
        format!("{:#}", err)
    })
}

#[cfg(feature = "tauri-plugin")]
#[tauri::command]
fn tauri_resize_command(request: TauriResizeRequest) -> std::result::Result<TauriResizeResponse, String> {
    resize_command(request)
}

#[cfg(feature = "tauri-plugin")]
pub fn init<R: tauri::Runtime>() -> tauri::plugin::TauriPlugin<R> {
    tauri::plugin::Builder::new("resizer")
        .invoke_handler(tauri::generate_handler![tauri_resize_command])
        .build()
}
