//! Pipeline configuration surface.
//!
//! All knobs are plain serde structs so the CLI can deserialize them from a
//! TOML file; components that need compiled forms (regexes, URL templates)
//! build them once at pipeline construction, not per row.

use serde::{Deserialize, Serialize};

/// Default directory for locally cached image files.
pub const DEFAULT_IMAGE_DIRECTORY: &str = "sql_images";

/// Default number of table entries per remote cache chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 60;

/// Default root key for the remote cache index record.
pub const DEFAULT_CACHE_ROOT_KEY: &str = "pictor-image-cache";

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Skip the image subsystem entirely; records pass through untouched.
    pub ignore_images: bool,

    /// Directory holding downloaded image files.
    pub image_directory: String,

    /// What the asset id is derived from. Changing this invalidates any
    /// previously persisted remote cache (the cache format version guards
    /// against silently mixing the two keyings).
    pub key_by: KeyBy,

    /// Optional filename rewrite applied before hashing the id.
    pub filename_pattern: Option<FilenamePattern>,

    /// CDN transform resolution; absent means every image takes the
    /// local-download path.
    pub cdn: Option<CdnConfig>,

    pub remote_cache: RemoteCacheConfig,

    pub concurrency: ConcurrencyConfig,

    /// Per-request timeout for all HTTP operations, in seconds.
    pub http_timeout_secs: u64,

    /// The queries to ingest, each with its image field declarations.
    pub queries: Vec<QueryConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ignore_images: false,
            image_directory: DEFAULT_IMAGE_DIRECTORY.to_string(),
            key_by: KeyBy::Filename,
            filename_pattern: None,
            cdn: None,
            remote_cache: RemoteCacheConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            http_timeout_secs: 30,
            queries: Vec::new(),
        }
    }
}

/// Source of the asset id digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyBy {
    /// Hash the normalized filename (last path segment, query and fragment
    /// stripped, optional pattern rewrite applied).
    #[default]
    Filename,
    /// Hash the full original URL.
    Url,
}

/// Regex rewrite applied to the extracted filename before hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilenamePattern {
    pub pattern: String,
    pub replace: String,
}

/// CDN transform resolution settings.
///
/// `url_template`, `info_template` and `placeholder_template` are expanded
/// with `{path}` (the provider-relative path obtained by stripping the
/// matched prefix) and, for `url_template`, `{width}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdnConfig {
    /// Regex matched against the full URL; the match is stripped to obtain
    /// the provider-relative path.
    pub pattern: String,

    /// Template for width-constrained transform URLs.
    pub url_template: String,

    /// Template for the dimension probe endpoint, expected to return JSON
    /// `{"width": .., "height": ..}`.
    pub info_template: String,

    /// Template for the low-resolution placeholder transform.
    pub placeholder_template: String,

    /// Responsive breakpoint widths, in pixels.
    pub sizes: Vec<u32>,
}

/// Remote metadata cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteCacheConfig {
    pub enabled: bool,
    pub chunk_size: usize,
    pub root_key: String,
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            root_key: DEFAULT_CACHE_ROOT_KEY.to_string(),
        }
    }
}

/// Independent concurrency caps for the three network-bound phases. The
/// caps are not pooled: resolve-time lookups, bulk downloads, and cache
/// chunk I/O each get their own limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// CDN probe/placeholder lookups during ingestion.
    pub resolve: usize,
    /// Bulk file downloads after ingestion.
    pub download: usize,
    /// Remote cache chunk reads and writes.
    pub cache_io: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            resolve: 8,
            download: default_download_concurrency(),
            cache_io: 8,
        }
    }
}

/// Download parallelism derived from the host, floored at 2 so a
/// single-core container still overlaps network waits.
pub fn default_download_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .max(2)
}

/// One ingestion query: a name (the sink collection) plus the fields that
/// hold image URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub name: String,
    #[serde(default)]
    pub images: Vec<ImageFieldConfig>,
}

/// Serialized image field declaration. A bare string names a single-URL
/// field; the table form declares a separator-joined multi-image field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageFieldConfig {
    Single(String),
    Multi {
        field: String,
        #[serde(default = "default_separator")]
        separator: String,
    },
}

fn default_separator() -> String {
    ",".to_string()
}
