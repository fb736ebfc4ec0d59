//! Stable content-id derivation for image URLs.
//!
//! Identity resolution is pure string work: no network, no clock, no
//! randomness. The same normalized input always hashes to the same
//! [`AssetId`], which is what makes dedup hold across records, concurrent
//! resolutions, and process restarts.

use pictor_common::checksum;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::config::{FilenamePattern, KeyBy};
use crate::types::AssetId;
use pictor_common::{PictorError, Result};

/// Accepted image references: https URLs with a path whose final segment
/// carries an allow-listed extension, optionally followed by a query or
/// fragment.
static IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https://.+/.+\.(jpg|jpeg|png|gif|svg)($|[?#])")
        .expect("image url pattern is valid")
});

/// Whether `url` looks like a downloadable image reference at all.
pub fn is_image_url(url: &str) -> bool {
    IMAGE_URL.is_match(url)
}

/// Extract the filename from an image URL: the final path segment with
/// query string and fragment stripped. Percent-encoded slashes are
/// normalized first, so bucket-style URLs (`.../o/images%2Fphoto.jpg`)
/// yield `photo.jpg` rather than the whole encoded segment.
pub fn extract_filename(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    let segment = segment.replace("%2F", "/").replace("%2f", "/");
    let name = segment.rsplit('/').next()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Derives [`AssetId`]s from raw URLs according to the configured keying
/// mode and optional filename rewrite.
#[derive(Debug)]
pub struct IdentityResolver {
    key_by: KeyBy,
    rewrite: Option<(Regex, String)>,
}

impl IdentityResolver {
    pub fn new(key_by: KeyBy, pattern: Option<&FilenamePattern>) -> Result<Self> {
        let rewrite = match pattern {
            Some(p) => {
                let regex = Regex::new(&p.pattern).map_err(|e| {
                    PictorError::Config(format!("Invalid filename pattern '{}': {}", p.pattern, e))
                })?;
                Some((regex, p.replace.clone()))
            }
            None => None,
        };
        Ok(Self { key_by, rewrite })
    }

    /// Resolve a URL to its asset id. Returns `None` for empty input or
    /// anything that is not a well-formed image reference.
    pub fn resolve(&self, url: &str) -> Option<AssetId> {
        if url.is_empty() || !is_image_url(url) {
            return None;
        }

        let key = match self.key_by {
            KeyBy::Filename => {
                let name = extract_filename(url)?;
                match &self.rewrite {
                    Some((regex, replace)) => regex.replace_all(&name, replace.as_str()).into_owned(),
                    None => name,
                }
            }
            KeyBy::Url => url.to_string(),
        };

        Some(AssetId::from_digest(checksum::short_digest(&key)))
    }
}
