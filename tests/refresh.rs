//! End-to-end refresh cycles against mock HTTP servers.
//!
//! Every test subscribes through discovery or directly, then drives
//! `FeedEngine::refresh` and inspects the store.

use chrono::{Duration, Utc};
use feedsync::engine::FeedEngine;
use feedsync::feed::OpenGraph;
use feedsync::storage::{Database, DiscoveredFeed, FeedFilter};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn test_engine(max_age_days: u32) -> FeedEngine {
    let db = Database::open(":memory:").await.unwrap();
    FeedEngine::new(db, reqwest::Client::new(), OpenGraph::disabled(), max_age_days)
}

/// RSS document with one item per `(guid, hours_ago)`, in the given order.
fn rss(title: &str, items: &[(&str, i64)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, hours_ago)| {
            let published = (Utc::now() - Duration::hours(*hours_ago)).to_rfc2822();
            format!(
                "<item><title>Item {guid}</title><link>https://example.com/{guid}</link>\
                 <description>About {guid}</description>\
                 <pubDate>{published}</pubDate><guid>{guid}</guid></item>"
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <rss version=\"2.0\"><channel><title>{title}</title>\
         <link>https://example.com/</link>{items}</channel></rss>"
    )
}

fn atom(title: &str, ids: &[&str]) -> String {
    let updated = Utc::now().to_rfc3339();
    let entries: String = ids
        .iter()
        .map(|id| {
            format!(
                "<entry><title>Entry {id}</title><link href=\"https://example.com/{id}\"/>\
                 <id>urn:example:{id}</id><updated>{updated}</updated>\
                 <content type=\"html\">Body {id}</content></entry>"
            )
        })
        .collect();
    format!("<feed xmlns=\"http://www.w3.org/2005/Atom\"><title>{title}</title>{entries}</feed>")
}

async fn mount(server: &MockServer, at: &str, body: String, mime: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, mime))
        .mount(server)
        .await;
}

async fn guids(engine: &FeedEngine, filter: FeedFilter) -> Vec<String> {
    engine
        .articles(filter, false, None)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.guid)
        .collect()
}

#[tokio::test]
async fn test_discover_subscribe_and_refresh() {
    let server = MockServer::start().await;
    let page = r#"<html><head>
        <link rel="alternate" type="application/rss+xml" title="Ignored" href="/rss.xml">
        <link rel="alternate" type="application/atom+xml" href="/atom.xml">
        </head><body></body></html>"#;
    mount(&server, "/", page.to_string(), "text/html; charset=utf-8").await;
    mount(&server, "/rss.xml", rss("RSS Side", &[("r1", 1), ("r2", 2)]), "application/rss+xml").await;
    mount(&server, "/atom.xml", atom("Atom Side", &["e1"]), "application/atom+xml").await;

    let engine = test_engine(14).await;
    let discovered = engine.resolve_feeds(&format!("{}/", server.uri())).await.unwrap();
    let names: Vec<_> = discovered.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["RSS Side", "Atom Side"]);

    for feed in &discovered {
        engine.add_feed(feed).await.unwrap();
    }
    assert!(engine.refresh().await);

    let counts: Vec<_> = engine
        .unread_counts_by_feed()
        .await
        .unwrap()
        .into_iter()
        .map(|(feed, unread)| (feed.name, unread))
        .collect();
    assert_eq!(counts, vec![("Atom Side".to_string(), 1), ("RSS Side".to_string(), 2)]);

    let all = guids(&engine, FeedFilter::All).await;
    assert!(all.contains(&"urn:example:e1".to_string()));
}

#[tokio::test]
async fn test_second_refresh_picks_up_only_new_items() {
    let server = MockServer::start().await;
    let engine = test_engine(14).await;

    // First cycle sees two items
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(rss("Blog", &[("b", 1), ("a", 2)]), "application/rss+xml"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Later cycles see one more on top
    mount(
        &server,
        "/rss",
        rss("Blog", &[("c", 0), ("b", 1), ("a", 2)]),
        "application/rss+xml",
    )
    .await;

    let feed = engine
        .add_feed(&DiscoveredFeed {
            name: "Blog".into(),
            url: format!("{}/rss", server.uri()),
        })
        .await
        .unwrap();
    let filter = FeedFilter::Feed(feed.id);

    assert!(engine.refresh().await);
    assert_eq!(guids(&engine, filter).await, vec!["b", "a"]);

    assert!(engine.refresh().await);
    assert_eq!(guids(&engine, filter).await, vec!["c", "b", "a"]);

    // Nothing new upstream: nothing inserted
    assert!(engine.refresh().await);
    assert_eq!(engine.article_count(filter, false).await.unwrap(), 3);
}

#[tokio::test]
async fn test_failing_feed_does_not_block_others() {
    let server = MockServer::start().await;
    mount(&server, "/good", rss("Good", &[("g1", 1)]), "application/rss+xml").await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount(&server, "/garbage", "<html>not a feed</html>".into(), "text/xml").await;

    let engine = test_engine(14).await;
    for (name, at) in [("Good", "/good"), ("Broken", "/broken"), ("Garbage", "/garbage")] {
        engine
            .add_feed(&DiscoveredFeed {
                name: name.into(),
                url: format!("{}{}", server.uri(), at),
            })
            .await
            .unwrap();
    }

    assert!(engine.refresh().await);
    assert_eq!(guids(&engine, FeedFilter::All).await, vec!["g1"]);
    assert!(!engine.is_refreshing());
}

#[tokio::test]
async fn test_old_items_are_not_stored() {
    let server = MockServer::start().await;
    // The young item after the stale one is not collected either
    mount(
        &server,
        "/rss",
        rss("Blog", &[("new", 1), ("stale", 24 * 10), ("young", 2)]),
        "application/rss+xml",
    )
    .await;

    let engine = test_engine(7).await;
    let feed = engine
        .add_feed(&DiscoveredFeed {
            name: "Blog".into(),
            url: format!("{}/rss", server.uri()),
        })
        .await
        .unwrap();

    assert!(engine.refresh().await);
    assert_eq!(guids(&engine, FeedFilter::Feed(feed.id)).await, vec!["new"]);
}
