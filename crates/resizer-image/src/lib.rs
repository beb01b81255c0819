use std::io::{BufRead, Seek};

use image::codecs::jpeg::JpegEncoder;
use image::{imageops::FilterType, ImageFormat, ImageReader, RgbImage};
use jpeg_decoder::{Decoder as JpegDecoder, PixelFormat};
use resizer_core::{CoreError, Dimensions, SampleFactor, ScaleResult};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("jpeg error: {0}")]
    Jpeg(String),
    #[error("image has zero extent")]
    Empty,
}

impl From<ImageError> for CoreError {
    fn from(err: ImageError) -> Self {
        CoreError::CodecFailure(err.to_string())
    }
}

pub fn estimate_rgb_bytes(size: Dimensions) -> u64 {
    size.pixel_count().saturating_mul(3)
}

/// Reads only the header. No pixel buffer is allocated.
pub fn probe_dimensions<R: BufRead + Seek>(reader: R) -> Result<Dimensions, ImageError> {
    let (width, height) = ImageReader::new(reader).with_guessed_format()?.into_dimensions()?;
    Dimensions::new(width, height).map_err(|_| ImageError::Empty)
}

/// Decodes at about `native / sample`.
///
/// JPEG sources are scaled inside the DCT (1/2, 1/4 or 1/8, whichever is the
/// smallest that still covers `ceil(native / sample)`), so the full-size
/// buffer never exists. Other formats decode fully and are then thinned with a nearest
/// neighbour pass. Multi-frame formats yield their first frame.
pub fn decode_sampled<R: BufRead + Seek>(reader: R, sample: SampleFactor) -> Result<RgbImage, ImageError> {
    let reader = ImageReader::new(reader).with_guessed_format()?;
    if reader.format() == Some(ImageFormat::Jpeg) && !sample.is_full_resolution() {
        return decode_jpeg_scaled(reader.into_inner(), sample);
    }
    let full = reader.decode()?.to_rgb8();
    Ok(subsample(full, sample))
}

fn decode_jpeg_scaled<R: BufRead>(reader: R, sample: SampleFactor) -> Result<RgbImage, ImageError> {
    let mut decoder = JpegDecoder::new(reader);
    decoder.read_info().map_err(jpeg_error)?;
    let info = decoder
        .info()
        .ok_or_else(|| ImageError::Jpeg("missing frame header".to_string()))?;
    let want_w = div_ceil(u32::from(info.width), sample.get()).clamp(1, u32::from(u16::MAX)) as u16;
    let want_h = div_ceil(u32::from(info.height), sample.get()).clamp(1, u32::from(u16::MAX)) as u16;
    let (scaled_w, scaled_h) = decoder.scale(want_w, want_h).map_err(jpeg_error)?;
    debug!(
        native_width = info.width,
        native_height = info.height,
        scaled_width = scaled_w,
        scaled_height = scaled_h,
        sample = sample.get(),
        "decoding jpeg with dct scaling"
    );
    let pixels = decoder.decode().map_err(jpeg_error)?;
    let info = decoder
        .info()
        .ok_or_else(|| ImageError::Jpeg("missing frame header after decode".to_string()))?;
    let (width, height) = (u32::from(info.width), u32::from(info.height));

    let rgb = match info.pixel_format {
        PixelFormat::RGB24 => pixels,
        PixelFormat::L8 => pixels.iter().flat_map(|&v| [v, v, v]).collect(),
        PixelFormat::CMYK32 => pixels
            .chunks_exact(4)
            .flat_map(|chunk| {
                let k = f32::from(chunk[3]) / 255.0;
                let channel = |c: u8| {
                    let c = f32::from(c) / 255.0 * (1.0 - k) + k;
                    ((1.0 - c) * 255.0).round().clamp(0.0, 255.0) as u8
                };
                [channel(chunk[0]), channel(chunk[1]), channel(chunk[2])]
            })
            .collect(),
        PixelFormat::L16 => return Err(ImageError::Jpeg("16-bit grayscale is not supported".to_string())),
    };
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| ImageError::Jpeg(format!("decoded buffer does not match {}x{}", width, height)))
}

fn jpeg_error(err: jpeg_decoder::Error) -> ImageError {
    match err {
        jpeg_decoder::Error::Unsupported(feature) => ImageError::Jpeg(format!("unsupported feature: {:?}", feature)),
        other => ImageError::Jpeg(other.to_string()),
    }
}

fn subsample(image: RgbImage, sample: SampleFactor) -> RgbImage {
    if sample.is_full_resolution() {
        return image;
    }
    let width = div_ceil(image.width(), sample.get());
    let height = div_ceil(image.height(), sample.get());
    image::imageops::resize(&image, width, height, FilterType::Nearest)
}

/// Exact resize with a bilinear filter. A no-op when the size already matches.
pub fn resize_exact(image: RgbImage, target: ScaleResult) -> RgbImage {
    if image.dimensions() == (target.width(), target.height()) {
        return image;
    }
    image::imageops::resize(&image, target.width(), target.height(), FilterType::Triangle)
}

/// JPEG at `quality` (0-100). The encoder's floor is 1, so 0 is encoded as 1.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode_image(image)?;
    Ok(out)
}

fn div_ceil(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor.max(1)).max(1)
}
