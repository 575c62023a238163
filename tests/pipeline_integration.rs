//! End-to-end pipeline: manifest to fetch to assets to dual-profile
//! package, plus the existence-based skip on re-run.

use std::path::PathBuf;
use std::sync::Arc;

use skillshelf::discovery::{BookRef, TopicManifest};
use skillshelf::epub;
use skillshelf::progress::SessionStatus;
use skillshelf::session::RotatingJar;
use skillshelf::{Config, EpubFormat, JobController, ProcessExit};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(dir: &TempDir, base_url: &str) -> Config {
    Config {
        base_directory: dir.path().join("books_by_skills"),
        book_ids_directory: dir.path().join("book_ids"),
        discovery_delay: 0.0,
        download_delay: 0.0,
        session_reuse_delay: 0.0,
        epub_format: EpubFormat::Dual,
        progress_file: dir.path().join("output/progress.json"),
        base_url: base_url.to_string(),
        ..Config::default()
    }
}

fn write_manifest(dir: &TempDir, server: &MockServer) {
    let manifest = TopicManifest::new(
        "Tiny Skill",
        vec![BookRef {
            title: "Tiny Book".to_string(),
            id: "tiny".to_string(),
            url: format!("{}/book/tiny", server.uri()),
            isbn: Some("9781449373320".to_string()),
            format: "book".to_string(),
        }],
    );
    manifest
        .write_to_dir(&dir.path().join("book_ids"))
        .unwrap();
}

async fn mount_tiny_book(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v1/book/tiny/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "title": "Tiny Book",
            "authors": [{"name": "Ann Author"}],
            "publishers": [{"name": "Example Press"}],
            "isbn": "9781449373320",
            "subjects": ["testing"],
            "cover": format!("{}/covers/small/tiny.jpg", server.uri()),
            "chapters": format!("{}/api/v1/book/tiny/chapter/", server.uri()),
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/book/tiny/chapter/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "count": 2,
            "next": null,
            "results": [
                {
                    "filename": "ch01.html",
                    "title": "Beginnings",
                    "content": format!("{}/content/ch01.html", server.uri()),
                    "asset_base_url": format!("{}/assets/", server.uri()),
                },
                {
                    "filename": "ch02.html",
                    "title": "Endings",
                    "content": format!("{}/content/ch02.html", server.uri()),
                    "asset_base_url": format!("{}/assets/", server.uri()),
                }
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/content/ch01.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><head><link rel="stylesheet" href="css/book.css"/></head>
               <body><h1 id="beginnings">Beginnings</h1>
               <p>Start here.</p><img src="fig1.png" alt="one"/>
               <a href="ch02.html#endings">forward</a></body></html>"#,
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/content/ch02.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<html><body><h1>Endings</h1><p>Stop here.</p></body></html>",
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/assets/fig1.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PNG".to_vec()))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/assets/css/book.css"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"p { margin: 0; }".to_vec()))
        .mount(server)
        .await;

    // Small thumbnail; the /large/ variant is the one worth keeping.
    Mock::given(method("GET"))
        .and(path("/covers/small/tiny.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 100]))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/covers/large/tiny.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 12 * 1024]))
        .mount(server)
        .await;
}

fn book_dir(dir: &TempDir) -> PathBuf {
    dir.path()
        .join("books_by_skills/Tiny Skill/Tiny Book (tiny)")
}

// Full pipeline over one book: dual profiles, structural checks.
#[tokio::test]
async fn download_produces_dual_profile_package() {
    let server = MockServer::start().await;
    mount_tiny_book(&server).await;

    let dir = TempDir::new().unwrap();
    write_manifest(&dir, &server);

    let config = test_config(&dir, &server.uri());
    let mut controller =
        JobController::new(config, Arc::new(RotatingJar::new()), None).unwrap();
    let exit = controller.run_download().await.unwrap();
    assert_eq!(exit, ProcessExit::Success);

    let book_dir = book_dir(&dir);
    let standard = book_dir.join("Tiny Book - Ann Author.epub");
    let reader = book_dir.join("Tiny Book - Ann Author (Kindle).epub");
    assert!(standard.exists(), "standard profile must exist");
    assert!(reader.exists(), "reader-optimized profile must exist");
    epub::structural_check(&standard).unwrap();
    epub::structural_check(&reader).unwrap();

    // Shared OEBPS tree with downloaded assets and the upgraded cover.
    assert!(book_dir.join("OEBPS/ch01.xhtml").exists());
    assert!(book_dir.join("OEBPS/ch02.xhtml").exists());
    assert!(book_dir.join("OEBPS/Images/fig1.png").exists());
    assert!(book_dir.join("OEBPS/Styles/book.css").exists());
    let cover = std::fs::read(book_dir.join("OEBPS/Images/cover.jpg")).unwrap();
    assert_eq!(cover.len(), 12 * 1024, "large cover variant must win");

    // Cross-chapter link rewritten inside the staged chapter.
    let ch01 = std::fs::read_to_string(book_dir.join("OEBPS/ch01.xhtml")).unwrap();
    assert!(ch01.contains(r##"href="ch02.xhtml#endings""##));

    // Progress reached completion and the summary was written.
    let state = controller.progress().state();
    assert_eq!(state.status, SessionStatus::Completed);
    assert_eq!(state.completed_books, 1);
    assert!(dir.path().join("output/skillshelf_summary.txt").exists());
}

// A completed book is skip-matched by the existence check, so a re-run
// issues no book requests at all.
#[tokio::test]
async fn rerun_skips_existing_books_without_network() {
    let server = MockServer::start().await;
    mount_tiny_book(&server).await;

    let dir = TempDir::new().unwrap();
    write_manifest(&dir, &server);

    let config = test_config(&dir, &server.uri());
    let mut first =
        JobController::new(config.clone(), Arc::new(RotatingJar::new()), None).unwrap();
    assert_eq!(first.run_download().await.unwrap(), ProcessExit::Success);
    drop(first);

    // Second run against a server with zero mounted routes: any request
    // would 404 and surface as a failure.
    let silent = MockServer::start().await;
    let config = Config {
        base_url: silent.uri(),
        ..config
    };
    let mut second =
        JobController::new(config, Arc::new(RotatingJar::new()), None).unwrap();
    let exit = second.run_download().await.unwrap();

    assert_eq!(exit, ProcessExit::Success);
    let state = second.progress().state();
    assert_eq!(state.completed_books, 1, "skip still counts as completed");
    assert!(state.failed_items.is_empty());
}

// force_redownload bypasses the existence check.
#[tokio::test]
async fn force_redownload_ignores_existing_files() {
    let server = MockServer::start().await;
    mount_tiny_book(&server).await;

    let dir = TempDir::new().unwrap();
    write_manifest(&dir, &server);

    let config = test_config(&dir, &server.uri());
    let mut first =
        JobController::new(config.clone(), Arc::new(RotatingJar::new()), None).unwrap();
    first.run_download().await.unwrap();
    drop(first);

    let stamp_before = std::fs::metadata(
        book_dir(&dir).join("Tiny Book - Ann Author.epub"),
    )
    .unwrap()
    .len();

    let config = Config {
        force_redownload: true,
        ..config
    };
    let mut second = JobController::new(config, Arc::new(RotatingJar::new()), None).unwrap();
    assert_eq!(second.run_download().await.unwrap(), ProcessExit::Success);

    let stamp_after = std::fs::metadata(
        book_dir(&dir).join("Tiny Book - Ann Author.epub"),
    )
    .unwrap()
    .len();
    assert_eq!(stamp_before, stamp_after, "rebuild is deterministic");
}

// A book whose chapters cannot be fetched is recorded and the run ends
// with partial success, not an abort.
#[tokio::test]
async fn failing_book_yields_partial_exit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/book/tiny/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    write_manifest(&dir, &server);

    let config = test_config(&dir, &server.uri());
    let mut controller =
        JobController::new(config, Arc::new(RotatingJar::new()), None).unwrap();
    let exit = controller.run_download().await.unwrap();

    assert_eq!(exit, ProcessExit::Partial);
    let state = controller.progress().state();
    assert_eq!(state.failed_items.len(), 1);
    assert!(state.failed_items.contains_key("tiny"));
}

// Deauthentication aborts the job with the auth exit code.
#[tokio::test]
async fn auth_failure_aborts_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/book/tiny/"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    write_manifest(&dir, &server);

    let config = test_config(&dir, &server.uri());
    let mut controller =
        JobController::new(config, Arc::new(RotatingJar::new()), None).unwrap();
    let err = controller.run_download().await.unwrap_err();
    assert_eq!(err.exit(), ProcessExit::AuthFailure);
    assert_eq!(
        controller.progress().state().status,
        SessionStatus::Failed
    );
}

// Discovery mode writes per-topic manifests via the controller.
#[tokio::test]
async fn discovery_mode_writes_manifest_files() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/search"))
        .and(query_param("topics", "Tiny Skill"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [{
                "title": "Relevant Enough Title",
                "archive_id": "tiny",
                "isbn": "9781449373320",
                "format": "book",
                "language": "en",
                "url": "https://example.com/book/tiny"
            }],
            "total": 1,
            "next": null,
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, &server.uri());
    let mut controller =
        JobController::new(config, Arc::new(RotatingJar::new()), None).unwrap();

    let topics = vec![skillshelf::Topic {
        name: "Tiny Skill".to_string(),
        expected_count: Some(1),
    }];
    let exit = controller.run_discovery(topics).await.unwrap();
    assert_eq!(exit, ProcessExit::Success);

    let manifest_path = dir.path().join("book_ids/Tiny_Skill.json");
    assert!(manifest_path.exists());
    let manifest = TopicManifest::load(&manifest_path).unwrap();
    assert_eq!(manifest.total_books, 1);
    assert_eq!(manifest.books[0].id, "tiny");
}
