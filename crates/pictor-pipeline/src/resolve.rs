//! Per-record image field resolution.
//!
//! Field dispatch is decided once, when configuration is parsed, as a
//! closed tagged variant, not re-inspected per row. During ingestion each
//! URL funnels through the shared [`ResolvedAssetTable`] so concurrent
//! references to the same asset resolve exactly once (first writer wins).

use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cdn::CdnResolver;
use crate::config::{ImageFieldConfig, PipelineConfig, QueryConfig};
use crate::identity::{self, IdentityResolver};
use crate::types::{LocalImage, Record, ResolvedAsset, ResolvedAssetTable};
use pictor_common::Result;

/// Caller-supplied URL extraction for fields the built-in forms cannot
/// express (library API only; not constructible from configuration files).
pub type CustomExtractor = Arc<dyn Fn(&Value) -> Vec<String> + Send + Sync>;

/// How one record field holds its image reference(s). Selected at
/// configuration-parse time.
#[derive(Clone)]
pub enum ImageField {
    /// The field value is a single URL.
    Single { field: String },
    /// The field value is a separator-joined URL list; resolves to an
    /// indexed array.
    Multi { field: String, separator: String },
    /// The extractor pulls URLs out of the raw field value; resolves to an
    /// indexed array.
    Custom {
        field: String,
        extract: CustomExtractor,
    },
}

impl ImageField {
    pub fn from_config(config: &ImageFieldConfig) -> Self {
        match config {
            ImageFieldConfig::Single(field) => ImageField::Single {
                field: field.clone(),
            },
            ImageFieldConfig::Multi { field, separator } => ImageField::Multi {
                field: field.clone(),
                separator: separator.clone(),
            },
        }
    }

    pub fn field(&self) -> &str {
        match self {
            ImageField::Single { field }
            | ImageField::Multi { field, .. }
            | ImageField::Custom { field, .. } => field,
        }
    }
}

impl fmt::Debug for ImageField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageField::Single { field } => f.debug_struct("Single").field("field", field).finish(),
            ImageField::Multi { field, separator } => f
                .debug_struct("Multi")
                .field("field", field)
                .field("separator", separator)
                .finish(),
            ImageField::Custom { field, .. } => {
                f.debug_struct("Custom").field("field", field).finish()
            }
        }
    }
}

/// One ingestion query with its parsed field plan.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub name: String,
    pub fields: Vec<ImageField>,
}

impl QueryPlan {
    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            name: config.name.clone(),
            fields: config.images.iter().map(ImageField::from_config).collect(),
        }
    }
}

/// Ingestion-time resolver: identity + CDN lookup + table bookkeeping.
pub struct AssetResolver {
    identity: IdentityResolver,
    cdn: Option<CdnResolver>,
    table: Arc<ResolvedAssetTable>,
    image_dir: PathBuf,
}

impl AssetResolver {
    pub fn new(
        config: &PipelineConfig,
        client: reqwest::Client,
        table: Arc<ResolvedAssetTable>,
    ) -> Result<Self> {
        let identity = IdentityResolver::new(config.key_by, config.filename_pattern.as_ref())?;
        let cdn = match &config.cdn {
            Some(cdn_config) => Some(CdnResolver::new(client, cdn_config)?),
            None => None,
        };
        Ok(Self {
            identity,
            cdn,
            table,
            image_dir: PathBuf::from(&config.image_directory),
        })
    }

    /// Resolve every configured image field of one record, in declaration
    /// order. Fields that are absent stay absent; everything else becomes
    /// either a resolved value or `null`.
    pub async fn resolve_record(&self, record: &mut Record, fields: &[ImageField]) {
        for field in fields {
            let Some(raw) = record.get(field.field()).cloned() else {
                continue;
            };

            let resolved = match field {
                ImageField::Single { .. } => match raw.as_str() {
                    Some(url) => self
                        .resolve_url(url)
                        .await
                        .map(|asset| asset.to_field_value())
                        .unwrap_or(Value::Null),
                    None => Value::Null,
                },
                ImageField::Multi { separator, .. } => match raw.as_str() {
                    Some(joined) => {
                        let urls: Vec<String> = joined
                            .split(separator.as_str())
                            .map(|part| part.trim().to_string())
                            .filter(|part| !part.is_empty())
                            .collect();
                        self.resolve_indexed(urls).await
                    }
                    None => Value::Null,
                },
                ImageField::Custom { extract, .. } => {
                    let urls = extract(&raw);
                    self.resolve_indexed(urls).await
                }
            };

            record.insert(field.field().to_string(), resolved);
        }
    }

    async fn resolve_indexed(&self, urls: Vec<String>) -> Value {
        let mut items = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            let image = self
                .resolve_url(url)
                .await
                .map(|asset| asset.to_field_value())
                .unwrap_or(Value::Null);
            items.push(json!({ "index": index, "image": image }));
        }
        Value::Array(items)
    }

    /// Resolve one URL through the table. Returns `None` for malformed
    /// references and for CDN assets whose probe or placeholder failed.
    pub async fn resolve_url(&self, url: &str) -> Option<ResolvedAsset> {
        let id = self.identity.resolve(url)?;

        if let Some(existing) = self.table.get(&id) {
            return Some(existing);
        }

        if let Some(cdn) = &self.cdn {
            if cdn.matches(url) {
                // A provider-pattern URL never falls back to local download;
                // a failed lookup drops the asset for this run.
                let remote = cdn.resolve(url).await?;
                return Some(
                    self.table
                        .insert_if_absent(id, ResolvedAsset::Remote(remote)),
                );
            }
        }

        let filename = identity::extract_filename(url)?;
        let local = LocalImage {
            local_path: self.image_dir.join(&filename),
            source_url: url.to_string(),
            filename,
        };
        Some(
            self.table
                .insert_if_absent(id, ResolvedAsset::Local(local)),
        )
    }
}
