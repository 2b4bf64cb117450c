//! HTTP feed retrieval against a local mock server.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use futures::StreamExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedvault::config::FetchConfig;
use feedvault::{
    Config, Database, FeedService, FeedSource, GetOneRequest, HttpFeedSource, IngestOutcome,
    VaultError,
};

fn sample_rss(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, date)| {
            format!(
                "<item><title>{title}</title><link>http://example.com/{title}</link>\
                 <pubDate>{date}</pubDate><description>&lt;b&gt;{title}&lt;/b&gt; body</description></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Test Feed</title>{items}</channel></rss>"#
    )
}

fn local_config() -> FetchConfig {
    FetchConfig {
        allow_private_hosts: true,
        ..FetchConfig::default()
    }
}

async fn mount(server: &MockServer, route: &str, status: u16, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(status)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_parses_items() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/feed",
        200,
        sample_rss(&[
            ("one", "Mon, 21 Oct 2024 07:28:00 GMT"),
            ("two", "Mon, 21 Oct 2024 08:00:00 GMT"),
        ]),
    )
    .await;

    let source = HttpFeedSource::new(&local_config()).unwrap();
    let items = source.fetch(&format!("{}/feed", server.uri())).await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].title, "one");
    assert_eq!(items[0].description, "one body");
    assert_eq!(
        items[1].published_at,
        Utc.with_ymd_and_hms(2024, 10, 21, 8, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_fetch_http_error_is_source_error() {
    let server = MockServer::start().await;
    mount(&server, "/gone", 404, String::new()).await;

    let source = HttpFeedSource::new(&local_config()).unwrap();
    let url = format!("{}/gone", server.uri());
    let err = source.fetch(&url).await.unwrap_err();

    assert!(err.is_transient_source());
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_fetch_rejects_oversized_body() {
    let server = MockServer::start().await;
    mount(&server, "/big", 200, "x".repeat(4096)).await;

    let config = FetchConfig {
        max_feed_size_bytes: 1024,
        ..local_config()
    };
    let source = HttpFeedSource::new(&config).unwrap();
    let err = source
        .fetch(&format!("{}/big", server.uri()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("too large"));
}

#[tokio::test]
async fn test_fetch_blocks_private_hosts_by_default() {
    let server = MockServer::start().await;
    mount(&server, "/feed", 200, sample_rss(&[])).await;

    let source = HttpFeedSource::new(&FetchConfig::default()).unwrap();
    let err = source
        .fetch(&format!("{}/feed", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Source { .. }));
    assert!(err.to_string().contains("private IP"));
}

#[tokio::test]
async fn test_ingest_over_http() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/good",
        200,
        sample_rss(&[
            ("old", "Sun, 24 May 2020 08:00:00 GMT"),
            ("new", "Sun, 24 May 2020 09:00:00 GMT"),
        ]),
    )
    .await;
    mount(&server, "/broken", 200, "not a feed".to_string()).await;

    let mut config = Config::default();
    config.fetch = local_config();
    let db = Arc::new(Database::open_in_memory().await.unwrap());
    let source = Arc::new(HttpFeedSource::new(&config.fetch).unwrap());
    let service = FeedService::new(db, source, &config);

    let good = format!("{}/good", server.uri());
    let broken = format!("{}/broken", server.uri());
    service
        .add_sources(&[good.clone(), broken.clone()])
        .await
        .unwrap();

    let report = service.ingest(&[]).await.unwrap();
    assert_eq!(report.get(&good), Some(&IngestOutcome::Inserted(2)));
    assert!(matches!(report.get(&broken), Some(IngestOutcome::Skipped(_))));

    let titles: Vec<_> = service
        .get_one(GetOneRequest::all(good))
        .await
        .unwrap()
        .map(|s| s.unwrap().title)
        .collect()
        .await;
    assert_eq!(titles, ["new", "old"]);
}
