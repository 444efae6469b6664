//! Integration tests for the media downloader.

mod support;

use blupen_core::media::{
    DownloadOutcome, MediaDownloader, MediaReference, MediaState, hashed_name,
};
use blupen_core::retry::RetryPolicy;
use std::time::Duration;
use support::socket_guard::start_mock_server_or_skip;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn downloader() -> MediaDownloader {
    MediaDownloader::new(
        reqwest::Client::new(),
        RetryPolicy::new(2, Duration::ZERO, Duration::ZERO),
    )
}

// ==================== File Name Tests ====================

#[tokio::test]
async fn test_image_url_keeps_its_file_name() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/photos/boat.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"PNGDATA".to_vec())
                .insert_header("Content-Type", "image/png"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut media = MediaReference::new(format!("{}/photos/boat.png", server.uri()));
    let outcome = downloader()
        .download_reference(&mut media, dir.path())
        .await
        .unwrap();

    assert!(matches!(outcome, DownloadOutcome::Downloaded { bytes: 7, .. }));
    let expected = dir.path().join("boat.png");
    assert_eq!(media.local_path(), Some(expected.as_path()));
    assert_eq!(std::fs::read(expected).unwrap(), b"PNGDATA");
}

#[tokio::test]
async fn test_url_without_image_name_is_hashed_with_content_type_extension() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/render"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"GIF89a".to_vec())
                .insert_header("Content-Type", "image/gif"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let url = format!("{}/render", server.uri());
    let mut media = MediaReference::new(url.clone());
    downloader()
        .download_reference(&mut media, dir.path())
        .await
        .unwrap();

    let expected = dir.path().join(hashed_name(&url, ".gif"));
    assert_eq!(media.local_path(), Some(expected.as_path()));
    assert!(expected.exists());
    assert!(!dir.path().join(hashed_name(&url, ".tmp")).exists());
}

// ==================== Failure Tests ====================

#[tokio::test]
async fn test_missing_asset_marks_reference_failed_without_retry() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/gone.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut media = MediaReference::new(format!("{}/gone.jpg", server.uri()));
    let result = downloader().download_reference(&mut media, dir.path()).await;

    assert!(result.is_err());
    assert!(matches!(media.state, MediaState::Failed { .. }));
    assert!(!dir.path().join("gone.jpg").exists());
    assert!(!dir.path().join("gone.jpg.part").exists());
}

#[tokio::test]
async fn test_download_all_counts_failures_and_continues() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/a.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"A".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b.jpg"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut refs = vec![
        MediaReference::new(format!("{}/b.jpg", server.uri())),
        MediaReference::new(format!("{}/a.jpg", server.uri())),
    ];
    let summary = downloader().download_all(refs.iter_mut(), dir.path()).await;

    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.failed, 1);
    assert!(refs[1].is_downloaded());
}

// ==================== Idempotence Tests ====================

#[tokio::test]
async fn test_second_pass_makes_no_requests() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/once.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ONCE".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let url = format!("{}/once.jpg", server.uri());
    let downloader = downloader();

    let mut first = vec![MediaReference::new(url.clone())];
    let summary = downloader.download_all(first.iter_mut(), dir.path()).await;
    assert_eq!(summary.downloaded, 1);

    // A fresh reference to the same asset finds the file already on disk.
    let mut second = vec![MediaReference::new(url)];
    let summary = downloader.download_all(second.iter_mut(), dir.path()).await;
    assert_eq!(summary.downloaded, 0);
    assert_eq!(summary.already_present, 1);
    assert!(second[0].is_downloaded());
}
