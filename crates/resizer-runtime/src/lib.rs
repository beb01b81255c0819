use std::env;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use image::RgbImage;
use resizer_core::{resolve_runtime_config, CoreError, Dimensions, ResizeBackend, RuntimeConfig, SampleFactor, ScaleResult};
use resizer_image::{decode_sampled, encode_jpeg, estimate_rgb_bytes, probe_dimensions, resize_exact};
use resizer_source::{ResolvedSource, ResolverConfig, SourceKind, SourceResolver};
use resizer_storage::{resolve_output_root, OutputWriter, StoredOutput};
use tracing::{debug, info, warn};

pub const ENV_OUTPUT_ROOT: &str = "RESIZER_OUTPUT_ROOT";
pub const ENV_ASSETS_ROOT: &str = "RESIZER_ASSETS_ROOT";
pub const ENV_CONTENT_INDEX: &str = "RESIZER_CONTENT_INDEX";
pub const ENV_HTTP_TIMEOUT_MS: &str = "RESIZER_HTTP_TIMEOUT_MS";

pub fn config_from_env() -> RuntimeConfig {
    config_from_lookup(|key| env::var(key).ok())
}

/// Builds a config from any key lookup. Unparseable timeouts are ignored.
pub fn config_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> RuntimeConfig {
    let http_timeout_ms = match lookup(ENV_HTTP_TIMEOUT_MS) {
        Some(raw) => raw.trim().parse::<u64>().unwrap_or_else(|_| {
            warn!(value = %raw, "ignoring unparseable {}", ENV_HTTP_TIMEOUT_MS);
            0
        }),
        None => 0,
    };
    resolve_runtime_config(RuntimeConfig {
        output_root: lookup(ENV_OUTPUT_ROOT),
        assets_root: lookup(ENV_ASSETS_ROOT),
        content_index: lookup(ENV_CONTENT_INDEX),
        http_timeout_ms,
    })
}

/// Filesystem and network backed implementation of [`ResizeBackend`].
#[derive(Debug)]
pub struct LocalResizeBackend {
    resolver: SourceResolver,
    writer: OutputWriter,
    // Remote sources are fetched once per operation: probe stores, decode takes.
    fetched: Mutex<Option<(String, ResolvedSource)>>,
}

impl LocalResizeBackend {
    pub fn new(resolver: SourceResolver, writer: OutputWriter) -> Self {
        Self {
            resolver,
            writer,
            fetched: Mutex::new(None),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Result<Self, CoreError> {
        let output_root = resolve_output_root(config.output_root.as_deref().map(Path::new))?;
        let resolver = SourceResolver::new(ResolverConfig {
            assets_root: config.assets_root.as_ref().map(PathBuf::from),
            content_index: config.content_index.as_ref().map(PathBuf::from),
            http_timeout: Some(Duration::from_millis(config.http_timeout_ms)),
        });
        debug!(output_root = %output_root.display(), "local resize backend ready");
        Ok(Self::new(resolver, OutputWriter::new(output_root)))
    }

    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_config(&config_from_env())
    }

    pub fn output_root(&self) -> &Path {
        self.writer.root()
    }

    pub fn resolver(&self) -> &SourceResolver {
        &self.resolver
    }

    /// Same as [`ResizeBackend::store`] but keeps the size and digest.
    pub fn store_detailed(&self, image: &RgbImage, folder_name: &str, quality: u8) -> Result<StoredOutput, CoreError> {
        let bytes = encode_jpeg(image, quality)?;
        let stored = self.writer.write(folder_name, &bytes)?;
        info!(
            uri = %stored.uri,
            bytes = stored.size,
            width = image.width(),
            height = image.height(),
            quality,
            "stored resized image"
        );
        Ok(stored)
    }

    fn source(&self, uri: &str, keep: bool) -> Result<ResolvedSource, CoreError> {
        let mut fetched = self
            .fetched
            .lock()
            .map_err(|_| CoreError::ResolutionFailure("source cache poisoned".to_string()))?;
        if fetched.as_ref().is_some_and(|(cached, _)| cached == uri) {
            let hit = if keep { fetched.clone() } else { fetched.take() };
            if let Some((_, source)) = hit {
                return Ok(source);
            }
        }
        let source = self.resolver.resolve(uri)?;
        debug!(uri, kind = ?source.kind, mime = ?source.mime_type, "resolved source");
        if keep && source.kind == SourceKind::Remote {
            *fetched = Some((uri.to_string(), source.clone()));
        }
        Ok(source)
    }

    fn forget(&self) {
        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.take();
        }
    }
}

impl ResizeBackend for LocalResizeBackend {
    type Image = RgbImage;

    fn probe(&self, uri: &str) -> Result<Dimensions, CoreError> {
        let source = self.source(uri, true)?;
        let dims = source
            .open()
            .map_err(CoreError::from)
            .and_then(|reader| Ok(probe_dimensions(reader)?))
            .inspect_err(|_| self.forget())?;
        debug!(
            uri,
            width = dims.width(),
            height = dims.height(),
            full_decode_bytes = estimate_rgb_bytes(dims),
            "probed bounds"
        );
        Ok(dims)
    }

    fn decode(&self, uri: &str, sample: SampleFactor) -> Result<RgbImage, CoreError> {
        let source = self.source(uri, false)?;
        let image = decode_sampled(source.open()?, sample)?;
        debug!(
            uri,
            sample = sample.get(),
            width = image.width(),
            height = image.height(),
            "decoded"
        );
        Ok(image)
    }

    fn resize(&self, image: RgbImage, target: ScaleResult) -> Result<RgbImage, CoreError> {
        if image.width() < target.width() || image.height() < target.height() {
            warn!(
                decoded_width = image.width(),
                decoded_height = image.height(),
                target_width = target.width(),
                target_height = target.height(),
                "decoded image is smaller than the output box, upscaling"
            );
        }
        Ok(resize_exact(image, target))
    }

    fn store(&self, image: &RgbImage, folder_name: &str, quality: u8) -> Result<String, CoreError> {
        Ok(self.store_detailed(image, folder_name, quality)?.uri)
    }
}
