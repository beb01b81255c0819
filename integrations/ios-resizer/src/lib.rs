use anyhow::{anyhow, Result};
use resizer_core::{v1, PlatformTarget};
use resizer_uniffi::{resize_v1, FfiError};
use serde::{Deserialize, Serialize};

pub const DEFAULT_QUALITY: u8 = 80;

/// Swift-facing request. `None` sizes are derived from the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IosBridgeRequest {
    pub uri: String,
    pub folder_name: String,
    pub quality: Option<u8>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IosBridgeResponse {
    pub file_uri: String,
    pub width: u32,
    pub height: u32,
}

pub fn to_v1_request(request: IosBridgeRequest) -> v1::ResizeRequest {
    v1::ResizeRequest {
        uri: request.uri,
        folder_name: request.folder_name,
        quality: i32::from(request.quality.unwrap_or(DEFAULT_QUALITY)),
        width: extent(request.max_width),
        height: extent(request.max_height),
    }
}

// Values past i32::MAX saturate rather than wrap into "unset".
fn extent(value: Option<u32>) -> i32 {
    value.map(|v| i32::try_from(v).unwrap_or(i32::MAX)).unwrap_or(0)
}

pub fn resize_photo(request: IosBridgeRequest) -> Result<IosBridgeResponse> {
    let response = resize_photo_v1(to_v1_request(request))?;
    Ok(IosBridgeResponse {
        file_uri: response.uri,
        width: response.width,
        height: response.height,
    })
}

pub fn resize_photo_v1(request: v1::ResizeRequest) -> Result<v1::ResizeResponse> {
    resize_v1(request, PlatformTarget::Ios).map_err(|err| match err {
        FfiError::InvalidArgument => anyhow!("invalid resize request"),
        FfiError::Resize => anyhow!("resize failed"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sizes_become_unset() {
        let request = to_v1_request(IosBridgeRequest {
            uri: "file:///var/mobile/a.heic".to_string(),
            folder_name: "thumbs".to_string(),
            quality: None,
            max_width: Some(640),
            max_height: None,
        });
        assert_eq!(request.quality, 80);
        assert_eq!((request.width, request.height), (640, 0));
    }

    #[test]
    fn huge_extent_saturates() {
        assert_eq!(extent(Some(u32::MAX)), i32::MAX);
        assert_eq!(extent(None), 0);
    }

    #[test]
    fn empty_folder_is_rejected_before_any_io() {
        let err = resize_photo(IosBridgeRequest {
            uri: "file:///var/mobile/a.jpg".to_string(),
            folder_name: " ".to_string(),
            quality: Some(50),
            max_width: Some(10),
            max_height: Some(10),
        })
        .expect_err("blank folder");
        assert_eq!(err.to_string(), "invalid resize request");
    }
}
