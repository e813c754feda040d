//! End-to-end assembly against the fake archive.
//!
//! Tests verify:
//! - Composite geometry and cache population for a tiled page
//! - Cache hits on repeated runs without network access
//! - Descriptor failures (error pages, missing properties)
//! - Missing tiles and the batch driver with receipts

use std::sync::Arc;

use image::GenericImageView;

use dezoom_cache::{
    ArchiveError, AssembleError, BatchRunner, CacheKey, ContentCache, DescriptorError,
    FetchOptions, ImageAssembler, ReceiptLedger,
};

use super::test_utils::{
    assembler_config, canonical_url, count_files, jpeg, page_url, zoomify_routes, FakeArchive,
    Route,
};

fn assembler(cache_dir: &std::path::Path, keep_tiles: bool) -> ImageAssembler {
    let cache = Arc::new(ContentCache::new(cache_dir));
    ImageAssembler::new(cache, FetchOptions::default(), assembler_config(keep_tiles)).unwrap()
}

// =============================================================================
// Tiled Pages
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_by_two_page_end_to_end() {
    let archive = FakeArchive::start(zoomify_routes("page-1", 128, 128, 64)).await;
    let dir = tempfile::tempdir().unwrap();
    let assembler = assembler(dir.path(), true);

    let response = assembler.assemble(&page_url(&archive, "page-1")).await.unwrap();

    assert!(response.tiled);
    assert!(!response.cache_hit);
    assert_eq!(response.failed_tiles, 0);

    let img = image::load_from_memory(&response.data).unwrap();
    assert_eq!(img.dimensions(), (2 * 64, 2 * 64));

    // 4 tiles, 1 descriptor, 1 composite
    assert_eq!(count_files(dir.path()), 6);
    assert_eq!(archive.request_count(), 5);

    let composite = CacheKey::of(&canonical_url(&archive, "page-1"));
    assert!(assembler.cache().contains(&composite).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_composite_covers_full_tile_grid() {
    // Edge tiles are cropped by the archive; the canvas is still whole tiles
    let archive = FakeArchive::start(zoomify_routes("page-2", 100, 70, 64)).await;
    let dir = tempfile::tempdir().unwrap();
    let assembler = assembler(dir.path(), false);

    let response = assembler.assemble(&page_url(&archive, "page-2")).await.unwrap();

    let img = image::load_from_memory(&response.data).unwrap();
    assert_eq!(img.dimensions(), (128, 128));

    // Tiles are dropped once composited
    assert_eq!(count_files(dir.path()), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_run_uses_cache_only() {
    let archive = FakeArchive::start(zoomify_routes("page-1", 128, 128, 64)).await;
    let dir = tempfile::tempdir().unwrap();
    let url = page_url(&archive, "page-1");

    let first = assembler(dir.path(), false).assemble(&url).await.unwrap();
    let requests = archive.request_count();

    // A fresh assembler over the same cache root, as in a later process
    let second = assembler(dir.path(), false).assemble(&url).await.unwrap();

    assert!(second.cache_hit);
    assert_eq!(first.data, second.data);
    assert_eq!(archive.request_count(), requests);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_tile_does_not_abort() {
    let mut routes = zoomify_routes("page-1", 128, 128, 64);
    routes.retain(|(path, _)| !path.ends_with("/1-1-0.jpg"));
    let archive = FakeArchive::start(routes).await;
    let dir = tempfile::tempdir().unwrap();
    let assembler = assembler(dir.path(), false);

    let url = page_url(&archive, "page-1");

    let response = assembler.assemble(&url).await.unwrap();

    assert_eq!(response.failed_tiles, 1);
    let img = image::load_from_memory(&response.data).unwrap();
    assert_eq!(img.dimensions(), (128, 128));

    // The incomplete composite is kept and served from then on
    let composite = CacheKey::of(&canonical_url(&archive, "page-1"));
    assert!(assembler.cache().contains(&composite).await);

    let requests = archive.request_count();
    let again = assembler.assemble(&url).await.unwrap();
    assert!(again.cache_hit);
    assert_eq!(again.data, response.data);
    assert_eq!(archive.request_count(), requests);
}

// =============================================================================
// Descriptor Failures
// =============================================================================

#[tokio::test]
async fn test_error_page_instead_of_descriptor() {
    let page = r#"<html><head><title>Error</title></head><body><div class="dpt_error_message_trace">Derivate not found</div></body></html>"#;
    let archive = FakeArchive::start(vec![(
        "/zoom/broken/ImageProperties.xml".to_string(),
        Route::Body(page.into()),
    )])
    .await;
    let dir = tempfile::tempdir().unwrap();
    let assembler = assembler(dir.path(), false);

    let result = assembler.assemble(&page_url(&archive, "broken")).await;

    match result {
        Err(AssembleError::Archive(ArchiveError::SoftErrorPage { message, .. })) => {
            assert_eq!(message.as_deref(), Some("Derivate not found"));
        }
        other => panic!("expected soft error page, got {other:?}"),
    }

    // The error page must not stay cached
    let descriptor = archive.url("/zoom/broken/ImageProperties.xml");
    assert!(!assembler.cache().contains(&CacheKey::of(&descriptor)).await);
}

#[tokio::test]
async fn test_descriptor_without_properties() {
    let archive = FakeArchive::start(vec![(
        "/zoom/odd/ImageProperties.xml".to_string(),
        Route::Body("<?xml version=\"1.0\"?><COLLECTION/>".into()),
    )])
    .await;
    let dir = tempfile::tempdir().unwrap();
    let assembler = assembler(dir.path(), false);

    match assembler.assemble(&page_url(&archive, "odd")).await {
        Err(AssembleError::Descriptor { source, url }) => {
            assert_eq!(source, DescriptorError::NoImageProperties);
            assert!(url.ends_with("/zoom/odd/ImageProperties.xml"));
        }
        other => panic!("expected descriptor error, got {other:?}"),
    }
}

// =============================================================================
// Single Resources and Batches
// =============================================================================

#[tokio::test]
async fn test_single_resource_page() {
    let archive = FakeArchive::start(vec![(
        "/plain/page.jpg".to_string(),
        Route::Body(jpeg(10, 10, 0)),
    )])
    .await;
    let dir = tempfile::tempdir().unwrap();
    let assembler = assembler(dir.path(), false);

    let response = assembler.assemble(&archive.url("/plain/page.jpg")).await.unwrap();

    assert!(!response.tiled);
    assert_eq!(response.data, jpeg(10, 10, 0));
    assert_eq!(count_files(dir.path()), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_batch_continues_after_failure_and_resumes() {
    let mut routes = zoomify_routes("page-1", 128, 128, 64);
    routes.push(("/plain/page-2.jpg".to_string(), Route::Body(jpeg(10, 10, 0))));
    let archive = FakeArchive::start(routes).await;

    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("receipts.json");
    let cache_dir = dir.path().join("cache");

    let pages = vec![
        vec![archive.url("/plain/missing.jpg")],
        vec![page_url(&archive, "page-1")],
        vec![archive.url("/plain/gone.jpg"), archive.url("/plain/page-2.jpg")],
    ];

    let runner = BatchRunner::new(Arc::new(assembler(&cache_dir, false)))
        .with_ledger(Arc::new(ReceiptLedger::load(&ledger_path).await.unwrap()))
        .with_output_dir(out.path());
    let report = runner.run(&pages).await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 0);
    assert!(out.path().join("0002-page-1").is_file());
    assert!(out.path().join("0003-gone.jpg").is_file());

    // A second run skips what the ledger already holds
    let runner = BatchRunner::new(Arc::new(assembler(&cache_dir, false)))
        .with_ledger(Arc::new(ReceiptLedger::load(&ledger_path).await.unwrap()));
    let report = runner.run(&pages).await;

    assert_eq!(report.skipped, 2);
    assert_eq!(report.failed, 1);
}
