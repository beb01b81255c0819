use anyhow::{Context, Result};
use resizer_core::{v1, PlatformTarget, ResizeBackend};
use resizer_uniffi::{execute_with_backend, PluginResult, PluginStatus, ResizerApi};
use serde::Serialize;

/// Ordinals of Cordova's `PluginResult.Status`.
pub mod cordova_status {
    pub const OK: i32 = 1;
    pub const INVALID_ACTION: i32 = 7;
    pub const ERROR: i32 = 9;
}

/// What the Java shim hands to `CallbackContext.sendPluginResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CordovaCallback {
    pub status: i32,
    pub message: Option<String>,
    pub keep_callback: bool,
}

impl From<PluginResult> for CordovaCallback {
    fn from(result: PluginResult) -> Self {
        let status = match result.status {
            PluginStatus::Ok => cordova_status::OK,
            PluginStatus::InvalidAction => cordova_status::INVALID_ACTION,
            PluginStatus::Error => cordova_status::ERROR,
        };
        Self {
            status,
            message: result.message,
            keep_callback: false,
        }
    }
}

/// Entry point for `CordovaPlugin.execute(action, args, callbackContext)`.
pub fn execute(action: &str, args_json: &str) -> CordovaCallback {
    ResizerApi::new().execute(action.to_string(), args_json.to_string()).into()
}

pub fn execute_with<B: ResizeBackend + ?Sized>(backend: &B, action: &str, args_json: &str) -> CordovaCallback {
    execute_with_backend(backend, action, args_json, PlatformTarget::Android).into()
}

pub fn callback_json(callback: &CordovaCallback) -> Result<String> {
    serde_json::to_string(callback).context("encoding cordova callback")
}

/// Builds the `args` array the JS side sends for one resize.
pub fn resize_args(request: &v1::ResizeRequest) -> Result<String> {
    serde_json::to_string(&[request]).context("encoding resize arguments")
}
