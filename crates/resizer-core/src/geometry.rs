//! Output geometry and decode-time sub-sampling.
//!
//! Both entry points are pure: no I/O, no logging, no allocation. Ratio
//! comparisons are done on 64-bit cross products so ties are exact and a
//! zero extent can never reach a division.

use std::cmp::Ordering;

use serde::Serialize;

use crate::CoreError;

/// Pixel extents of a real image. Both axes are always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Dimensions {
    width: u32,
    height: u32,
}

/// Final box handed to the precise resize step.
pub type ScaleResult = Dimensions;

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Result<Self, CoreError> {
        if width == 0 || height == 0 {
            return Err(CoreError::PreconditionViolation(format!(
                "dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        Ok(Self { width, height })
    }

    /// Checked conversion from signed extents as they arrive on the wire.
    pub fn from_signed(width: i64, height: i64) -> Result<Self, CoreError> {
        match (u32::try_from(width), u32::try_from(height)) {
            (Ok(w), Ok(h)) => Self::new(w, h),
            _ => Err(CoreError::PreconditionViolation(format!(
                "dimensions must be positive and fit in 32 bits, got {}x{}",
                width, height
            ))),
        }
    }

    pub fn width(self) -> u32 {
        self.width
    }

    pub fn height(self) -> u32 {
        self.height
    }

    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Caller's requested box. A non-positive raw extent means "derive this axis".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum RequestedSize {
    BothUnset,
    WidthOnly { width: u32 },
    HeightOnly { height: u32 },
    BothSet { width: u32, height: u32 },
}

impl RequestedSize {
    pub fn from_raw(width: i64, height: i64) -> Self {
        match (positive_extent(width), positive_extent(height)) {
            (None, None) => Self::BothUnset,
            (Some(width), None) => Self::WidthOnly { width },
            (None, Some(height)) => Self::HeightOnly { height },
            (Some(width), Some(height)) => Self::BothSet { width, height },
        }
    }
}

impl From<Dimensions> for RequestedSize {
    fn from(dims: Dimensions) -> Self {
        Self::BothSet {
            width: dims.width,
            height: dims.height,
        }
    }
}

fn positive_extent(raw: i64) -> Option<u32> {
    if raw > 0 {
        Some(u32::try_from(raw).unwrap_or(u32::MAX))
    } else {
        None
    }
}

/// Integer divisor applied by the decoder before the precise resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SampleFactor(u32);

impl SampleFactor {
    pub const FULL: SampleFactor = SampleFactor(1);

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_full_resolution(self) -> bool {
        self.0 == 1
    }
}

/// Native dimensions plus the requested box for one resize operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleRequest {
    pub native: Dimensions,
    pub requested: RequestedSize,
}

impl ScaleRequest {
    pub fn new(orig_width: i64, orig_height: i64, req_width: i64, req_height: i64) -> Result<Self, CoreError> {
        Ok(Self {
            native: Dimensions::from_signed(orig_width, orig_height)?,
            requested: RequestedSize::from_raw(req_width, req_height),
        })
    }

    pub fn output(&self) -> ScaleResult {
        resolve(self.native, self.requested)
    }

    pub fn sample_factor(&self) -> SampleFactor {
        sample_size(self.native, decode_target(self.native, self.requested))
    }
}

/// Aspect-fit policy: one requested axis is honored exactly, the other is
/// derived from the native ratio and floored. Never pads.
pub fn resolve(native: Dimensions, requested: RequestedSize) -> ScaleResult {
    match requested {
        RequestedSize::BothUnset => native,
        RequestedSize::WidthOnly { width } => honor_width(native, width),
        RequestedSize::HeightOnly { height } => honor_height(native, height),
        RequestedSize::BothSet { width, height } => {
            let native_cross = u64::from(native.width) * u64::from(height);
            let requested_cross = u64::from(width) * u64::from(native.height);
            match native_cross.cmp(&requested_cross) {
                // source relatively wider than the box
                Ordering::Greater => honor_width(native, width),
                Ordering::Less => honor_height(native, height),
                Ordering::Equal => Dimensions { width, height },
            }
        }
    }
}

/// Signed-integer form of [`resolve`]; non-positive native extents are rejected.
pub fn resolve_raw(orig_width: i64, orig_height: i64, req_width: i64, req_height: i64) -> Result<ScaleResult, CoreError> {
    Ok(ScaleRequest::new(orig_width, orig_height, req_width, req_height)?.output())
}

fn honor_width(native: Dimensions, width: u32) -> Dimensions {
    Dimensions {
        width,
        height: derive_axis(width, native.height, native.width),
    }
}

fn honor_height(native: Dimensions, height: u32) -> Dimensions {
    Dimensions {
        width: derive_axis(height, native.width, native.height),
        height,
    }
}

// floor(honored * numerator / denominator), clamped to [1, u32::MAX]
fn derive_axis(honored: u32, numerator: u32, denominator: u32) -> u32 {
    let value = u64::from(honored) * u64::from(numerator) / u64::from(denominator);
    u32::try_from(value).unwrap_or(u32::MAX).max(1)
}

/// Coarse decode divisor: the floored ratio along the limiting axis.
///
/// Never rounds to a power of two. A destination larger than the source
/// yields [`SampleFactor::FULL`].
pub fn sample_size(src: Dimensions, dst: Dimensions) -> SampleFactor {
    let src_cross = u64::from(src.width) * u64::from(dst.height);
    let dst_cross = u64::from(dst.width) * u64::from(src.height);
    let factor = if src_cross > dst_cross {
        src.width / dst.width
    } else {
        src.height / dst.height
    };
    SampleFactor(factor.max(1))
}

/// Signed-integer form of [`sample_size`]. A zero or negative destination is a
/// caller contract violation, reported rather than divided by.
pub fn sample_size_raw(src_width: i64, src_height: i64, dst_width: i64, dst_height: i64) -> Result<SampleFactor, CoreError> {
    let src = Dimensions::from_signed(src_width, src_height)?;
    let dst = Dimensions::from_signed(dst_width, dst_height)?;
    Ok(sample_size(src, dst))
}

/// Destination box for [`sample_size`]: the raw request with each unset axis
/// replaced by the native extent of that axis.
pub fn decode_target(native: Dimensions, requested: RequestedSize) -> Dimensions {
    match requested {
        RequestedSize::BothUnset => native,
        RequestedSize::WidthOnly { width } => Dimensions {
            width,
            height: native.height,
        },
        RequestedSize::HeightOnly { height } => Dimensions {
            width: native.width,
            height,
        },
        RequestedSize::BothSet { width, height } => Dimensions { width, height },
    }
}
