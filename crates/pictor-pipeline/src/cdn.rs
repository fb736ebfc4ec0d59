//! CDN transform resolution: responsive descriptors without local downloads.
//!
//! For URLs served by a transform-capable CDN, there is nothing to cache
//! on disk since the provider can scale on demand. Resolution probes the
//! native dimensions, fetches a tiny placeholder rendition, and builds the
//! `src`/`srcset` descriptor the site component consumes. Every step is
//! independently fallible; any failure degrades that one asset to
//! unresolved and never touches the rest of the run.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::config::CdnConfig;
use crate::types::{Dimensions, RemoteImage};
use pictor_common::{PictorError, Result};

#[derive(Debug, Deserialize)]
struct ProbeResponse {
    width: u32,
    height: u32,
}

/// Resolves provider-pattern URLs into [`RemoteImage`] descriptors.
#[derive(Debug, Clone)]
pub struct CdnResolver {
    client: reqwest::Client,
    pattern: Regex,
    url_template: String,
    info_template: String,
    placeholder_template: String,
    sizes: Vec<u32>,
}

impl CdnResolver {
    pub fn new(client: reqwest::Client, config: &CdnConfig) -> Result<Self> {
        let pattern = Regex::new(&config.pattern).map_err(|e| {
            PictorError::Config(format!("Invalid CDN pattern '{}': {}", config.pattern, e))
        })?;

        let mut sizes = config.sizes.clone();
        sizes.sort_unstable();
        sizes.dedup();

        Ok(Self {
            client,
            pattern,
            url_template: config.url_template.clone(),
            info_template: config.info_template.clone(),
            placeholder_template: config.placeholder_template.clone(),
            sizes,
        })
    }

    /// Whether this resolver is applicable to `url` at all. Non-matching
    /// URLs take the local-download path instead.
    pub fn matches(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    /// Resolve a matching URL. Returns `None` when the probe or the
    /// placeholder fetch fails; the asset is then dropped for this run, not
    /// retried as a local download.
    pub async fn resolve(&self, url: &str) -> Option<RemoteImage> {
        let path = self.pattern.replace(url, "").into_owned();

        let dims = match self.probe(&path).await {
            Ok(dims) => dims,
            Err(e) => {
                warn!(url = %url, error = %e, "CDN dimension probe failed, skipping asset");
                return None;
            }
        };

        let data_uri = match self.placeholder(&path).await {
            Ok(uri) => uri,
            Err(e) => {
                warn!(url = %url, error = %e, "CDN placeholder fetch failed, skipping asset");
                return None;
            }
        };

        Some(self.build_descriptor(&path, dims, data_uri))
    }

    /// Probe the provider for native image dimensions.
    async fn probe(&self, path: &str) -> Result<Dimensions> {
        let url = self.info_template.replace("{path}", path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PictorError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PictorError::Network(format!(
                "{}: status {}",
                url,
                response.status()
            )));
        }

        let probe: ProbeResponse = response
            .json()
            .await
            .map_err(|e| PictorError::Network(e.to_string()))?;

        Ok(Dimensions {
            width: probe.width,
            height: probe.height,
        })
    }

    /// Fetch the low-resolution placeholder and encode it as a data URI.
    async fn placeholder(&self, path: &str) -> Result<String> {
        let url = self.placeholder_template.replace("{path}", path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PictorError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PictorError::Network(format!(
                "{}: status {}",
                url,
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PictorError::Network(e.to_string()))?;

        Ok(format!("data:{};base64,{}", content_type, BASE64.encode(&bytes)))
    }

    /// One srcset entry per breakpoint strictly below the native width,
    /// plus the native-width rendition which doubles as `src`.
    fn build_descriptor(&self, path: &str, dims: Dimensions, data_uri: String) -> RemoteImage {
        let mut srcset: Vec<String> = self
            .sizes
            .iter()
            .filter(|&&w| w < dims.width)
            .map(|&w| format!("{} {}w", self.transform_url(path, w), w))
            .collect();

        let src = self.transform_url(path, dims.width);
        srcset.push(format!("{} {}w", src, dims.width));

        let sizes = format!("(max-width: {0}px) 100vw, {0}px", dims.width);

        RemoteImage {
            src,
            srcset,
            sizes,
            data_uri,
            size: dims,
        }
    }

    fn transform_url(&self, path: &str, width: u32) -> String {
        self.url_template
            .replace("{width}", &width.to_string())
            .replace("{path}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> CdnConfig {
        CdnConfig {
            pattern: format!("^{}/upload/", regex::escape(&server.uri())),
            url_template: format!("{}/upload/w_{{width}}/{{path}}", server.uri()),
            info_template: format!("{}/info/{{path}}", server.uri()),
            placeholder_template: format!("{}/upload/w_30,e_blur/{{path}}", server.uri()),
            sizes: vec![480, 1024, 1920],
        }
    }

    async fn mount_probe(server: &MockServer, width: u32, height: u32) {
        Mock::given(method("GET"))
            .and(path("/info/photos/cat.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "width": width,
                "height": height,
            })))
            .mount(server)
            .await;
    }

    async fn mount_placeholder(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/upload/w_30,e_blur/photos/cat.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"tiny".to_vec())
                    .insert_header("content-type", "image/jpeg"),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_breakpoints_above_native_width_are_excluded() {
        let server = MockServer::start().await;
        mount_probe(&server, 1600, 900).await;
        mount_placeholder(&server).await;

        let resolver = CdnResolver::new(reqwest::Client::new(), &config(&server)).unwrap();
        let url = format!("{}/upload/photos/cat.jpg", server.uri());
        assert!(resolver.matches(&url));

        let image = resolver.resolve(&url).await.unwrap();

        assert_eq!(image.size.width, 1600);
        assert_eq!(image.srcset.len(), 3);
        assert!(image.srcset[0].ends_with(" 480w"));
        assert!(image.srcset[1].ends_with(" 1024w"));
        // 1920 >= native width: excluded; the native rendition closes the set.
        assert!(image.srcset[2].ends_with(" 1600w"));
        assert_eq!(image.src, format!("{}/upload/w_1600/photos/cat.jpg", server.uri()));
        assert_eq!(image.sizes, "(max-width: 1600px) 100vw, 1600px");
    }

    #[tokio::test]
    async fn test_placeholder_is_encoded_as_data_uri() {
        let server = MockServer::start().await;
        mount_probe(&server, 1600, 900).await;
        mount_placeholder(&server).await;

        let resolver = CdnResolver::new(reqwest::Client::new(), &config(&server)).unwrap();
        let url = format!("{}/upload/photos/cat.jpg", server.uri());
        let image = resolver.resolve(&url).await.unwrap();

        assert_eq!(image.data_uri, format!("data:image/jpeg;base64,{}", BASE64.encode(b"tiny")));
    }

    #[tokio::test]
    async fn test_probe_failure_drops_the_asset() {
        let server = MockServer::start().await;
        // No probe mock mounted: the request 404s.
        mount_placeholder(&server).await;

        let resolver = CdnResolver::new(reqwest::Client::new(), &config(&server)).unwrap();
        let url = format!("{}/upload/photos/cat.jpg", server.uri());

        assert!(resolver.resolve(&url).await.is_none());
    }

    #[tokio::test]
    async fn test_placeholder_failure_drops_the_asset() {
        let server = MockServer::start().await;
        mount_probe(&server, 1600, 900).await;
        // No placeholder mock mounted.

        let resolver = CdnResolver::new(reqwest::Client::new(), &config(&server)).unwrap();
        let url = format!("{}/upload/photos/cat.jpg", server.uri());

        assert!(resolver.resolve(&url).await.is_none());
    }

    #[test]
    fn test_non_matching_url() {
        let config = CdnConfig {
            pattern: "^https://res\\.cdn\\.test/upload/".to_string(),
            url_template: "https://res.cdn.test/upload/w_{width}/{path}".to_string(),
            info_template: "https://res.cdn.test/info/{path}".to_string(),
            placeholder_template: "https://res.cdn.test/upload/w_30/{path}".to_string(),
            sizes: vec![480],
        };
        let resolver = CdnResolver::new(reqwest::Client::new(), &config).unwrap();
        assert!(!resolver.matches("https://elsewhere.test/photo.jpg"));
    }
}
