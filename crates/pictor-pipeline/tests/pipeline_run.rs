//! End-to-end pipeline runs against mocked HTTP and an in-memory store.

use async_trait::async_trait;
use pictor_common::{PictorError, Result};
use pictor_pipeline::cache::SaveOutcome;
use pictor_pipeline::config::{
    CdnConfig, PipelineConfig, QueryConfig, RemoteCacheConfig, ImageFieldConfig,
};
use pictor_pipeline::{ContentSink, MemoryStore, Pipeline, Record, RowSource};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct StaticSource {
    rows: HashMap<String, Vec<Record>>,
}

#[async_trait]
impl RowSource for StaticSource {
    async fn fetch(&self, query: &str) -> Result<Vec<Record>> {
        self.rows
            .get(query)
            .cloned()
            .ok_or_else(|| PictorError::Config(format!("unknown query '{}'", query)))
    }
}

#[derive(Default)]
struct CollectingSink {
    nodes: Vec<(String, Record)>,
}

#[async_trait]
impl ContentSink for CollectingSink {
    async fn add_node(&mut self, collection: &str, record: Record) -> Result<()> {
        self.nodes.push((collection.to_string(), record));
        Ok(())
    }
}

fn record(fields: &[(&str, Value)]) -> Record {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn base_config(image_dir: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        image_directory: image_dir.display().to_string(),
        remote_cache: RemoteCacheConfig {
            enabled: true,
            ..Default::default()
        },
        queries: vec![QueryConfig {
            name: "posts".to_string(),
            images: vec![ImageFieldConfig::Single("cover".to_string())],
        }],
        ..Default::default()
    }
}

async fn mount_image(server: &MockServer, name: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/img/{}", name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"imagebytes".to_vec()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn warm_second_run_downloads_nothing_and_skips_the_cache_save() {
    let server = MockServer::start().await;
    mount_image(&server, "a.jpg").await;
    mount_image(&server, "b.png").await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());

    let rows = HashMap::from([(
        "posts".to_string(),
        vec![
            record(&[
                ("id", json!(1)),
                ("cover", json!(format!("{}/img/a.jpg", server.uri()))),
            ]),
            record(&[
                ("id", json!(2)),
                ("cover", json!(format!("{}/img/b.png", server.uri()))),
            ]),
            // Same asset as record 1: dedups to one download.
            record(&[
                ("id", json!(3)),
                ("cover", json!(format!("{}/img/a.jpg", server.uri()))),
            ]),
        ],
    )]);
    let source = StaticSource { rows };

    // First run: cold cache, two unique assets to download.
    let mut sink = CollectingSink::default();
    let mut pipeline = Pipeline::new(base_config(dir.path()))
        .unwrap()
        .with_store(Arc::clone(&store) as Arc<dyn pictor_pipeline::MetadataStore>);
    let report = pipeline.run(&source, &mut sink).await.unwrap();

    assert_eq!(report.records, 3);
    assert_eq!(report.assets, 2);
    assert_eq!(report.downloads.total, 2);
    assert_eq!(report.downloads.downloaded, 2);
    assert!(matches!(report.cache_save, Some(SaveOutcome::Saved { .. })));
    assert!(dir.path().join("a.jpg").is_file());
    assert!(dir.path().join("b.png").is_file());

    // Records 1 and 3 resolved to the same local path.
    assert_eq!(sink.nodes[0].1["cover"], sink.nodes[2].1["cover"]);

    // Second run: files on disk, table hydrated from the remote cache,
    // fingerprint unchanged. Zero downloads, zero cache writes.
    let puts_after_first = store.put_count();
    let mut sink = CollectingSink::default();
    let mut pipeline = Pipeline::new(base_config(dir.path()))
        .unwrap()
        .with_store(Arc::clone(&store) as Arc<dyn pictor_pipeline::MetadataStore>);
    let report = pipeline.run(&source, &mut sink).await.unwrap();

    assert_eq!(report.downloads.total, 0);
    assert_eq!(report.already_cached, 2);
    assert_eq!(report.cache_save, Some(SaveOutcome::Unchanged));
    assert_eq!(store.put_count(), puts_after_first);
}

#[tokio::test]
async fn cdn_urls_resolve_to_descriptors_without_downloads() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/info/photos/cat.jpg"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"width": 1600, "height": 900})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/upload/w_30,e_blur/photos/cat.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"tiny".to_vec())
                .insert_header("content-type", "image/jpeg"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.remote_cache.enabled = false;
    config.cdn = Some(CdnConfig {
        pattern: format!("^{}/upload/", regex::escape(&server.uri())),
        url_template: format!("{}/upload/w_{{width}}/{{path}}", server.uri()),
        info_template: format!("{}/info/{{path}}", server.uri()),
        placeholder_template: format!("{}/upload/w_30,e_blur/{{path}}", server.uri()),
        sizes: vec![480, 1024, 1920],
    });

    let rows = HashMap::from([(
        "posts".to_string(),
        vec![record(&[
            ("id", json!(1)),
            ("cover", json!(format!("{}/upload/photos/cat.jpg", server.uri()))),
        ])],
    )]);
    let source = StaticSource { rows };

    let mut sink = CollectingSink::default();
    let mut pipeline = Pipeline::new(config).unwrap();
    let report = pipeline.run(&source, &mut sink).await.unwrap();

    assert_eq!(report.downloads.total, 0);
    let cover = &sink.nodes[0].1["cover"];
    assert_eq!(cover["size"]["width"], 1600);
    let srcset = cover["srcset"].as_array().unwrap();
    assert_eq!(srcset.len(), 3);
    assert!(srcset[2].as_str().unwrap().ends_with(" 1600w"));
    assert!(cover["dataUri"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn ignore_images_passes_fields_through_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let mut config = base_config(dir.path());
    config.ignore_images = true;

    let url = "https://x.test/img/photo.jpg";
    let rows = HashMap::from([(
        "posts".to_string(),
        vec![record(&[("id", json!(1)), ("cover", json!(url))])],
    )]);
    let source = StaticSource { rows };

    let mut sink = CollectingSink::default();
    let mut pipeline = Pipeline::new(config)
        .unwrap()
        .with_store(Arc::clone(&store) as Arc<dyn pictor_pipeline::MetadataStore>);
    let report = pipeline.run(&source, &mut sink).await.unwrap();

    assert_eq!(sink.nodes[0].1["cover"], json!(url));
    assert_eq!(report.assets, 0);
    assert_eq!(report.cache_save, None);
    // Cache phases skipped entirely: no reads, no writes.
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn a_record_without_an_id_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.remote_cache.enabled = false;

    let rows = HashMap::from([(
        "posts".to_string(),
        vec![record(&[("cover", json!("https://x.test/img/a.jpg"))])],
    )]);
    let source = StaticSource { rows };

    let mut sink = CollectingSink::default();
    let mut pipeline = Pipeline::new(config).unwrap();
    let result = pipeline.run(&source, &mut sink).await;

    assert!(matches!(
        result,
        Err(PictorError::MissingId { collection }) if collection == "posts"
    ));
}

#[tokio::test]
async fn a_failing_row_source_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.remote_cache.enabled = false;
    config.queries[0].name = "missing".to_string();

    let source = StaticSource {
        rows: HashMap::new(),
    };
    let mut sink = CollectingSink::default();
    let mut pipeline = Pipeline::new(config).unwrap();

    assert!(pipeline.run(&source, &mut sink).await.is_err());
}

#[test]
fn an_empty_query_set_is_rejected_up_front() {
    let config = PipelineConfig::default();
    assert!(matches!(
        Pipeline::new(config),
        Err(PictorError::NoQueries)
    ));
}
