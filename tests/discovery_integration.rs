//! Discovery engine behavior over a mocked search API.

use std::sync::Arc;
use std::time::Duration;

use skillshelf::discovery::{DiscoveryEngine, StopReason, Topic, make_dialect};
use skillshelf::pacing::Pacer;
use skillshelf::session::{RotatingJar, SessionClient};
use skillshelf::ApiVersion;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn engine(server: &MockServer, max_pages: usize) -> DiscoveryEngine {
    let session = Arc::new(
        SessionClient::new(Arc::new(RotatingJar::new()), None, 5).expect("client builds"),
    );
    let pacer = Arc::new(Pacer::new(
        Duration::from_millis(1),
        Duration::from_millis(1),
        Duration::from_millis(1),
    ));
    DiscoveryEngine::new(
        session,
        make_dialect(ApiVersion::V2, &server.uri()).expect("dialect builds"),
        pacer,
        None,
        max_pages,
    )
}

fn valid_book(id: usize) -> serde_json::Value {
    serde_json::json!({
        "title": format!("Relevant Book Number {id}"),
        "archive_id": format!("book-{id}"),
        "isbn": "9781449373320",
        "format": "book",
        "language": "en",
        "subjects": ["engineering"],
        "url": format!("https://example.com/book/{id}")
    })
}

fn noise_entry(id: usize) -> serde_json::Value {
    // Rejected by the relevance filter (video format).
    serde_json::json!({
        "title": format!("Video Course {id}"),
        "archive_id": format!("video-{id}"),
        "format": "video",
        "language": "en"
    })
}

// An empty topic issues one request and writes an empty manifest.
#[tokio::test]
async fn empty_topic_yields_empty_manifest_after_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/search"))
        .and(query_param("topics", "NoSuchSkill"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [], "total": 0, "next": null, "previous": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let topic = Topic {
        name: "NoSuchSkill".to_string(),
        expected_count: Some(0),
    };
    let outcome = engine(&server, 100).discover_topic(&topic).await.unwrap();

    assert_eq!(outcome.pages_fetched, 1);
    assert_eq!(outcome.manifest.total_books, 0);
    assert!(outcome.manifest.books.is_empty());
    assert_eq!(outcome.manifest.skill_name, "NoSuchSkill");
}

// When one page satisfies the expected count, pagination stops there.
#[tokio::test]
async fn exact_count_topic_stops_after_expected_reached() {
    let server = MockServer::start().await;
    let results: Vec<_> = (0..27).map(valid_book).collect();
    Mock::given(method("GET"))
        .and(path("/api/v2/search"))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": results,
            "total": 27,
            "next": format!("{}/api/v2/search?page=1", server.uri()),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let topic = Topic {
        name: "Engineering Leadership".to_string(),
        expected_count: Some(27),
    };
    let outcome = engine(&server, 100).discover_topic(&topic).await.unwrap();

    assert_eq!(outcome.pages_fetched, 1);
    assert_eq!(outcome.manifest.total_books, 27);
    assert_eq!(outcome.stop, StopReason::LimitReached);
}

// Three consecutive pages with zero accepted books end the topic.
#[tokio::test]
async fn three_empty_pages_trigger_early_stop() {
    let server = MockServer::start().await;
    for page in 0..3u32 {
        let results: Vec<_> = (0..6)
            .map(|i| valid_book(page as usize * 6 + i))
            .collect();
        Mock::given(method("GET"))
            .and(path("/api/v2/search"))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": results,
                "total": 500,
                "next": format!("{}/api/v2/search?page={}", server.uri(), page + 1),
            })))
            .expect(1)
            .mount(&server)
            .await;
    }
    for page in 3..7u32 {
        let results: Vec<_> = (0..6)
            .map(|i| noise_entry(page as usize * 6 + i))
            .collect();
        let expected = u64::from(page <= 5);
        Mock::given(method("GET"))
            .and(path("/api/v2/search"))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": results,
                "total": 500,
                "next": format!("{}/api/v2/search?page={}", server.uri(), page + 1),
            })))
            .expect(expected)
            .mount(&server)
            .await;
    }

    let topic = Topic {
        name: "Kubernetes Security".to_string(),
        expected_count: Some(30),
    };
    let outcome = engine(&server, 100).discover_topic(&topic).await.unwrap();

    assert_eq!(outcome.pages_fetched, 6, "3 productive + 3 empty pages");
    assert_eq!(outcome.manifest.total_books, 18);
    assert_eq!(outcome.stop, StopReason::EmptyStreak);
}

// Terminal condition (iii): the API reports no further pages.
#[tokio::test]
async fn api_exhaustion_stops_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/search"))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [valid_book(1), valid_book(2)],
            "total": 2,
            "next": null,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let topic = Topic {
        name: "Niche Topic".to_string(),
        expected_count: Some(50),
    };
    let outcome = engine(&server, 100).discover_topic(&topic).await.unwrap();

    assert_eq!(outcome.manifest.total_books, 2);
    assert_eq!(outcome.stop, StopReason::Exhausted);
}

// Terminal condition (iv): the hard page cap from configuration.
#[tokio::test]
async fn hard_page_cap_bounds_pagination() {
    let server = MockServer::start().await;
    // Every page returns one fresh valid book and claims more pages exist.
    for page in 0..2u32 {
        Mock::given(method("GET"))
            .and(path("/api/v2/search"))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [valid_book(page as usize)],
                "total": 10_000,
                "next": format!("{}/api/v2/search?page={}", server.uri(), page + 1),
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let topic = Topic {
        name: "Everything".to_string(),
        expected_count: None,
    };
    let outcome = engine(&server, 2).discover_topic(&topic).await.unwrap();

    assert_eq!(outcome.pages_fetched, 2);
    assert_eq!(outcome.stop, StopReason::BudgetExhausted);
}

// Duplicate ids across pages collapse to one manifest entry.
#[tokio::test]
async fn duplicates_across_pages_are_deduplicated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/search"))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [valid_book(1), valid_book(1), valid_book(2)],
            "total": 3,
            "next": null,
        })))
        .mount(&server)
        .await;

    let topic = Topic {
        name: "Topic".to_string(),
        expected_count: None,
    };
    let outcome = engine(&server, 10).discover_topic(&topic).await.unwrap();

    assert_eq!(outcome.manifest.total_books, 2);
}

// The v1 dialect works end-to-end through the engine as well.
#[tokio::test]
async fn v1_dialect_complete_flag_ends_discovery() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/search"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [valid_book(1)],
            "complete": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = Arc::new(
        SessionClient::new(Arc::new(RotatingJar::new()), None, 5).expect("client builds"),
    );
    let pacer = Arc::new(Pacer::new(
        Duration::from_millis(1),
        Duration::from_millis(1),
        Duration::from_millis(1),
    ));
    let engine = DiscoveryEngine::new(
        session,
        make_dialect(ApiVersion::V1, &server.uri()).expect("dialect builds"),
        pacer,
        None,
        100,
    );

    let topic = Topic {
        name: "Rust".to_string(),
        expected_count: None,
    };
    let outcome = engine.discover_topic(&topic).await.unwrap();
    assert_eq!(outcome.manifest.total_books, 1);
    assert_eq!(outcome.stop, StopReason::Exhausted);
}
