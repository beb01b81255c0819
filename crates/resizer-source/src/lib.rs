use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Cursor, Seek};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use resizer_core::CoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CONTENT_INDEX_NAME: &str = "content-index.json";
pub const SCHEMA_VERSION: u32 = 1;

const FILE_SCHEME: &str = "file://";
const ASSET_PREFIX: &str = "file:///android_asset/";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("could not determine a default data directory")]
    NoDefaultDataDir,
    #[error("no content record for {0}")]
    UnknownContent(String),
    #[error("bundled asset requested but no assets root is configured: {0}")]
    NoAssetsRoot(String),
    #[error("http {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<SourceError> for CoreError {
    fn from(err: SourceError) -> Self {
        CoreError::ResolutionFailure(err.to_string())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> SourceError {
    SourceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    File,
    Asset,
    Content,
    Remote,
}

#[derive(Debug, Clone)]
pub enum SourceData {
    Path(PathBuf),
    Memory(Vec<u8>),
}

pub trait BufReadSeek: BufRead + Seek {}

impl<T: BufRead + Seek> BufReadSeek for T {}

/// A locator turned into something that can be opened (repeatedly).
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub kind: SourceKind,
    pub mime_type: Option<String>,
    pub data: SourceData,
}

impl ResolvedSource {
    pub fn open(&self) -> Result<Box<dyn BufReadSeek>, SourceError> {
        match &self.data {
            SourceData::Path(path) => {
                let file = fs::File::open(path).map_err(|e| io_error(path, e))?;
                Ok(Box::new(BufReader::new(file)))
            }
            SourceData::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.data {
            SourceData::Path(path) => Some(path),
            SourceData::Memory(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub uri: String,
    pub document_id: Option<String>,
    pub path: String,
    pub mime_type: Option<String>,
}

/// Indirect content records (`content://…` → file on disk).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentIndex {
    #[serde(alias = "schema_version")]
    pub schema_version: u32,
    pub records: Vec<ContentRecord>,
}

impl Default for ContentIndex {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            records: Vec::new(),
        }
    }
}

impl ContentIndex {
    pub fn lookup_exact(&self, uri: &str) -> Option<&ContentRecord> {
        self.records.iter().find(|r| r.uri == uri)
    }

    /// Exact URI match first, then the document id taken from the URI.
    pub fn lookup(&self, uri: &str) -> Option<&ContentRecord> {
        if let Some(record) = self.lookup_exact(uri) {
            return Some(record);
        }
        let id = document_id(uri)?;
        self.records.iter().find(|r| r.document_id.as_deref() == Some(id))
    }
}

pub fn default_data_dir() -> Result<PathBuf, SourceError> {
    let home = dirs::home_dir().ok_or(SourceError::NoDefaultDataDir)?;
    Ok(home.join(".resizer"))
}

pub fn default_content_index_path() -> Result<PathBuf, SourceError> {
    Ok(default_data_dir()?.join(CONTENT_INDEX_NAME))
}

pub fn read_content_index(path: &Path) -> Result<ContentIndex, SourceError> {
    let data = fs::read(path).map_err(|e| io_error(path, e))?;
    Ok(serde_json::from_slice(&data)?)
}

pub fn write_content_index(path: &Path, index: &ContentIndex) -> Result<(), SourceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let data = serde_json::to_vec_pretty(index)?;
    fs::write(path, data).map_err(|e| io_error(path, e))?;
    Ok(())
}

/// Later records replace earlier ones with the same URI.
pub fn merge_content_records(existing: Option<ContentIndex>, updates: Vec<ContentRecord>) -> ContentIndex {
    let mut by_uri = BTreeMap::new();
    if let Some(index) = existing {
        for record in index.records {
            by_uri.insert(record.uri.clone(), record);
        }
    }
    for record in updates {
        by_uri.insert(record.uri.clone(), record);
    }
    ContentIndex {
        schema_version: SCHEMA_VERSION,
        records: by_uri.into_values().collect(),
    }
}

/// Removes a leading `file://`; anything else is returned unchanged.
pub fn strip_file_protocol(uri: &str) -> &str {
    uri.strip_prefix(FILE_SCHEME).unwrap_or(uri)
}

pub fn strip_query(uri: &str) -> &str {
    match uri.find('?') {
        Some(idx) => &uri[..idx],
        None => uri,
    }
}

/// Last path segment of a content URI, reduced to the part after a `:` or `;`
/// when present (`…/document/image%3A42` style ids arrive decoded as `image:42`).
pub fn document_id(uri: &str) -> Option<&str> {
    let segment = strip_query(uri).rsplit('/').next().filter(|s| !s.is_empty())?;
    let id = if let Some((_, rest)) = segment.split_once(':') {
        rest.split(':').next().unwrap_or(rest)
    } else if let Some((_, rest)) = segment.split_once(';') {
        rest.split(';').next().unwrap_or(rest)
    } else {
        segment
    };
    Some(id).filter(|id| !id.is_empty())
}

/// Best-effort MIME guess used to filter batch inputs and to label sources in logs.
/// Decoding always sniffs the bytes. Covers the formats the image stack decodes,
/// plus `3ga` which is reported as `audio/3gpp`.
pub fn mime_type_for_extension(path: &str) -> Option<&'static str> {
    let extension = match path.rfind('.') {
        Some(idx) => &path[idx + 1..],
        None => path,
    };
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" | "jpe" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "3ga" => Some("audio/3gpp"),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolverConfig {
    pub assets_root: Option<PathBuf>,
    pub content_index: Option<PathBuf>,
    pub http_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct SourceResolver {
    config: ResolverConfig,
}

impl SourceResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn resolve(&self, uri: &str) -> Result<ResolvedSource, SourceError> {
        if uri.starts_with("content") {
            return self.resolve_content(uri);
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return self.fetch_remote(uri);
        }
        if uri.starts_with(FILE_SCHEME) {
            let uri = strip_query(uri);
            if let Some(relative) = uri.strip_prefix(ASSET_PREFIX) {
                return self.resolve_asset(uri, relative);
            }
            // file:// locators may still be backed by a content record, matched on the full URI only
            if let Some(record) = self.content_record(uri, ContentIndex::lookup_exact)? {
                return Ok(from_record(&record));
            }
            return Ok(local_file(strip_file_protocol(uri)));
        }
        Ok(local_file(uri))
    }

    fn resolve_content(&self, uri: &str) -> Result<ResolvedSource, SourceError> {
        let record = self
            .content_record(uri, ContentIndex::lookup)?
            .ok_or_else(|| SourceError::UnknownContent(uri.to_string()))?;
        debug!(uri, path = %record.path, "resolved content record");
        Ok(from_record(&record))
    }

    fn content_record(
        &self,
        uri: &str,
        lookup: for<'a> fn(&'a ContentIndex, &str) -> Option<&'a ContentRecord>,
    ) -> Result<Option<ContentRecord>, SourceError> {
        let index_path = match &self.config.content_index {
            Some(path) => path.clone(),
            None => default_content_index_path()?,
        };
        if !index_path.exists() {
            return Ok(None);
        }
        let index = read_content_index(&index_path)?;
        Ok(lookup(&index, uri).cloned())
    }

    fn resolve_asset(&self, uri: &str, relative: &str) -> Result<ResolvedSource, SourceError> {
        let root = self
            .config
            .assets_root
            .as_ref()
            .ok_or_else(|| SourceError::NoAssetsRoot(uri.to_string()))?;
        let path = root.join(relative);
        Ok(ResolvedSource {
            kind: SourceKind::Asset,
            mime_type: mime_type_for_extension(relative).map(str::to_string),
            data: SourceData::Path(path),
        })
    }

    fn fetch_remote(&self, url: &str) -> Result<ResolvedSource, SourceError> {
        let mut builder = Client::builder().user_agent("resizer-source/0.1");
        if let Some(timeout) = self.config.http_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        let response = client.get(url).send()?;
        if !response.status().is_success() {
            return Err(SourceError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .or_else(|| mime_type_for_extension(strip_query(url)).map(str::to_string));
        let bytes = response.bytes()?.to_vec();
        debug!(url, bytes = bytes.len(), "fetched remote source");
        Ok(ResolvedSource {
            kind: SourceKind::Remote,
            mime_type,
            data: SourceData::Memory(bytes),
        })
    }
}

fn from_record(record: &ContentRecord) -> ResolvedSource {
    ResolvedSource {
        kind: SourceKind::Content,
        mime_type: record
            .mime_type
            .clone()
            .or_else(|| mime_type_for_extension(&record.path).map(str::to_string)),
        data: SourceData::Path(PathBuf::from(&record.path)),
    }
}

fn local_file(path: &str) -> ResolvedSource {
    ResolvedSource {
        kind: SourceKind::File,
        mime_type: mime_type_for_extension(path).map(str::to_string),
        data: SourceData::Path(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn record(uri: &str, id: Option<&str>, path: &str) -> ContentRecord {
        ContentRecord {
            uri: uri.to_string(),
            document_id: id.map(str::to_string),
            path: path.to_string(),
            mime_type: None,
        }
    }

    fn resolver_with(dir: &Path, records: Vec<ContentRecord>) -> SourceResolver {
        let index_path = dir.join(CONTENT_INDEX_NAME);
        write_content_index(&index_path, &merge_content_records(None, records)).expect("write index");
        SourceResolver::new(ResolverConfig {
            assets_root: Some(dir.join("assets")),
            content_index: Some(index_path),
            http_timeout: None,
        })
    }

    #[test]
    fn strip_file_protocol_only_touches_the_prefix() {
        assert_eq!(strip_file_protocol("file:///sdcard/a.jpg"), "/sdcard/a.jpg");
        assert_eq!(strip_file_protocol("/sdcard/a.jpg"), "/sdcard/a.jpg");
        assert_eq!(strip_file_protocol("content://media/1"), "content://media/1");
    }

    #[test]
    fn document_id_takes_part_after_separator() {
        assert_eq!(document_id("content://com.android.providers.media.documents/document/image:42"), Some("42"));
        assert_eq!(document_id("content://docs/document/raw;17?x=1"), Some("17"));
        assert_eq!(document_id("content://media/external/images/media/99"), Some("99"));
        assert_eq!(document_id("content://media/"), None);
    }

    #[test]
    fn mime_lookup_is_case_insensitive_with_3ga_special_case() {
        assert_eq!(mime_type_for_extension("/a/B.JPG"), Some("image/jpeg"));
        assert_eq!(mime_type_for_extension("clip.3ga"), Some("audio/3gpp"));
        assert_eq!(mime_type_for_extension("notes.txtx"), None);
        assert_eq!(mime_type_for_extension("scan.bmp"), None);
    }

    #[test]
    fn merge_replaces_existing_record() {
        let existing = merge_content_records(None, vec![record("content://a/1", Some("1"), "/old.jpg")]);
        let merged = merge_content_records(Some(existing), vec![record("content://a/1", Some("1"), "/new.jpg")]);
        assert_eq!(merged.records.len(), 1);
        assert_eq!(merged.records[0].path, "/new.jpg");
    }

    #[test]
    fn plain_path_and_file_uri_resolve_to_the_same_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let photo = dir.path().join("photo.png");
        fs::write(&photo, b"png-bytes").expect("write photo");
        let resolver = resolver_with(dir.path(), vec![]);

        let plain = resolver.resolve(photo.to_str().expect("utf8")).expect("plain path");
        let uri = format!("file://{}?cache=123", photo.display());
        let via_uri = resolver.resolve(&uri).expect("file uri");
        assert_eq!(plain.path(), Some(photo.as_path()));
        assert_eq!(via_uri.path(), Some(photo.as_path()));
        assert_eq!(via_uri.kind, SourceKind::File);
        assert_eq!(via_uri.mime_type.as_deref(), Some("image/png"));

        let mut bytes = Vec::new();
        via_uri.open().expect("open").read_to_end(&mut bytes).expect("read");
        assert_eq!(bytes, b"png-bytes");
    }

    #[test]
    fn bundled_assets_map_under_assets_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = resolver_with(dir.path(), vec![]);
        let source = resolver
            .resolve("file:///android_asset/www/img/logo.jpg?v=2")
            .expect("asset");
        assert_eq!(source.kind, SourceKind::Asset);
        assert_eq!(source.path(), Some(dir.path().join("assets").join("www/img/logo.jpg").as_path()));
    }

    #[test]
    fn assets_need_a_root() {
        let resolver = SourceResolver::new(ResolverConfig {
            content_index: Some(PathBuf::from("/nonexistent/index.json")),
            ..ResolverConfig::default()
        });
        let err = resolver.resolve("file:///android_asset/a.png").expect_err("no root");
        assert!(matches!(err, SourceError::NoAssetsRoot(_)));
    }

    #[test]
    fn content_uris_resolve_by_uri_then_document_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = resolver_with(
            dir.path(),
            vec![
                record("content://media/external/images/media/7", Some("7"), "/pics/seven.jpg"),
                record("content://other/1", Some("42"), "/pics/answer.webp"),
            ],
        );
        let direct = resolver.resolve("content://media/external/images/media/7").expect("direct");
        assert_eq!(direct.path(), Some(Path::new("/pics/seven.jpg")));
        assert_eq!(direct.kind, SourceKind::Content);

        let by_id = resolver
            .resolve("content://com.android.providers.media.documents/document/image:42")
            .expect("by document id");
        assert_eq!(by_id.path(), Some(Path::new("/pics/answer.webp")));
        assert_eq!(by_id.mime_type.as_deref(), Some("image/webp"));
    }

    #[test]
    fn file_uri_prefers_content_record_when_present() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = resolver_with(dir.path(), vec![record("file:///virtual/a.jpg", None, "/real/a.jpg")]);
        let source = resolver.resolve("file:///virtual/a.jpg?x").expect("record");
        assert_eq!(source.path(), Some(Path::new("/real/a.jpg")));
    }

    #[test]
    fn file_uri_ignores_document_id_matches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let photo = dir.path().join("7");
        fs::write(&photo, b"bytes").expect("write photo");
        let resolver = resolver_with(
            dir.path(),
            vec![record("content://media/external/images/media/7", Some("7"), "/somewhere/else.jpg")],
        );

        let source = resolver.resolve(&format!("file://{}", photo.display())).expect("file uri");
        assert_eq!(source.kind, SourceKind::File);
        assert_eq!(source.path(), Some(photo.as_path()));

        let content = resolver.resolve("content://downloads/public/7").expect("content by id");
        assert_eq!(content.path(), Some(Path::new("/somewhere/else.jpg")));
    }

    #[test]
    fn unknown_content_is_a_resolution_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = resolver_with(dir.path(), vec![]);
        let err = resolver.resolve("content://nothing/here/5").expect_err("missing");
        assert!(matches!(err, SourceError::UnknownContent(_)));
        let core: CoreError = err.into();
        assert_eq!(core.code(), resizer_core::ErrorCode::ResolutionFailure);
    }

    #[test]
    fn missing_local_file_fails_on_open() {
        let resolver = SourceResolver::new(ResolverConfig::default());
        let source = resolver.resolve("/definitely/not/here.png").expect("resolution is lazy");
        assert!(source.open().is_err());
    }
}
