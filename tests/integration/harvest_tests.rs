//! Integration tests for whole jobs
//!
//! These tests use wiremock to serve listing pages and data files, then
//! drive jobs through the orchestrator end-to-end: discovery, filtering,
//! the streaming pipeline, directory storage and the seen database.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use sumi_harvest::config::{parse_config, Config};
use sumi_harvest::orchestrator::{
    ConfigJobFactory, FailureKind, InProcessLauncher, JobLauncher, JobResult, ProcessLauncher,
};
use sumi_harvest::storage::download_counts;
use sumi_harvest::supervisor::ExitReason;
use sumi_harvest::ProcessPoolOrchestrator;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a configuration whose output lives under `dir`
///
/// `jobs` is the raw `[[job]]` TOML appended after the common sections.
fn create_test_config(dir: &TempDir, jobs: &str) -> String {
    format!(
        r#"
[orchestrator]
pool-size = 2
grace-period-secs = 2
mode = "in-process"

[pipeline]
download-workers = 2
poll-timeout-ms = 20

[retry]
tries = 3
initial-delay-ms = 10
max-delay-ms = 50
initial-timeout-secs = 5

[output]
storage-dir = "{root}/files"
seen-db = "{root}/seen.db"

{jobs}
"#,
        root = dir.path().display(),
        jobs = jobs
    )
}

fn load(toml: &str) -> Arc<Config> {
    Arc::new(parse_config(toml).expect("test config should be valid"))
}

async fn run_in_process(config: &Arc<Config>) -> Vec<(String, JobResult)> {
    let factory = ConfigJobFactory::new(Arc::clone(config)).expect("factory");
    let launcher = Arc::new(InProcessLauncher::new(Arc::new(factory)));
    let orchestrator =
        ProcessPoolOrchestrator::from_config(config, launcher).expect("orchestrator");
    orchestrator.run().await
}

async fn serve_file(server: &MockServer, file: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/data/{}", file)))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
        .mount(server)
        .await;
}

async fn serve_listing(server: &MockServer, at: &str, files: &[&str]) {
    let links: String = files
        .iter()
        .map(|f| format!(r#"<a href="/data/{}">{}</a>"#, f, f))
        .collect();
    Mock::given(method("GET"))
        .and(path(at.to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("<html><body>{}</body></html>", links))
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

fn read_stored(dir: &TempDir, job: &str, key: &str) -> String {
    std::fs::read_to_string(dir.path().join("files").join(job).join(key)).unwrap_or_default()
}

fn seen_count(dir: &TempDir, job: &str) -> u64 {
    download_counts(&dir.path().join("seen.db"))
        .expect("seen db readable")
        .into_iter()
        .find(|(name, _, _)| name == job)
        .map(|(_, files, _)| files)
        .unwrap_or(0)
}

#[tokio::test]
async fn test_single_page_job_collects_matching_files() {
    let server = MockServer::start().await;
    serve_listing(&server, "/latest/", &["a.nc", "b.nc", "notes.txt"]).await;
    serve_file(&server, "a.nc", "alpha").await;
    serve_file(&server, "b.nc", "bravo").await;

    let dir = TempDir::new().unwrap();
    let jobs = format!(
        r#"
[[job]]
name = "sst"
single-pass = true
[job.source]
kind = "single-page-html"
url = "{uri}/latest/"
pattern = "\\.nc$"
"#,
        uri = server.uri()
    );
    let config = load(&create_test_config(&dir, &jobs));

    let results = run_in_process(&config).await;
    assert_eq!(results.len(), 1);
    let outcome = results[0].1.as_ref().expect("job should succeed");

    assert_eq!(outcome.collected_total, 2);
    assert_eq!(outcome.exit_reason, ExitReason::SinglePassCompleted);
    assert_eq!(outcome.stats.stored, 2);

    assert_eq!(read_stored(&dir, "sst", "a.nc"), "alpha");
    assert_eq!(read_stored(&dir, "sst", "b.nc"), "bravo");
    assert!(!dir.path().join("files/sst/notes.txt").exists());
    assert_eq!(seen_count(&dir, "sst"), 2);
}

#[tokio::test]
async fn test_seen_files_are_not_downloaded_again() {
    let server = MockServer::start().await;
    serve_listing(&server, "/latest/", &["a.nc"]).await;
    Mock::given(method("GET"))
        .and(path("/data/a.nc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("alpha"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let jobs = format!(
        r#"
[[job]]
name = "sst"
single-pass = true
empty-expected = true
[job.source]
kind = "single-page-html"
url = "{uri}/latest/"
pattern = "\\.nc$"
"#,
        uri = server.uri()
    );
    let config = load(&create_test_config(&dir, &jobs));

    let first = run_in_process(&config).await;
    assert_eq!(first[0].1.as_ref().unwrap().collected_total, 1);

    // A fresh factory re-opens the seen database like a new process would
    let second = run_in_process(&config).await;
    let outcome = second[0].1.as_ref().unwrap();
    assert_eq!(outcome.collected_total, 0);
    assert_eq!(outcome.exit_reason, ExitReason::SinglePassCompleted);
    assert_eq!(seen_count(&dir, "sst"), 1);
}

#[tokio::test]
async fn test_empty_source_reports_no_files_found() {
    let server = MockServer::start().await;
    serve_listing(&server, "/latest/", &["readme.txt"]).await;

    let dir = TempDir::new().unwrap();
    let jobs = format!(
        r#"
[[job]]
name = "gfs"
single-pass = true
[job.source]
kind = "single-page-html"
url = "{uri}/latest/"
pattern = "\\.grib2$"
"#,
        uri = server.uri()
    );
    let config = load(&create_test_config(&dir, &jobs));

    let results = run_in_process(&config).await;
    let failure = results[0].1.as_ref().unwrap_err();
    assert_eq!(failure.kind, FailureKind::NoFilesFound);
    assert_eq!(failure.job, "gfs");
}

#[tokio::test]
async fn test_paginated_job_stops_at_first_empty_page() {
    let server = MockServer::start().await;
    serve_listing(&server, "/archive/1/", &["p1.nc"]).await;
    serve_listing(&server, "/archive/2/", &["p2.nc"]).await;
    serve_listing(&server, "/archive/3/", &[]).await;
    Mock::given(method("GET"))
        .and(path("/archive/4/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    serve_file(&server, "p1.nc", "one").await;
    serve_file(&server, "p2.nc", "two").await;

    let dir = TempDir::new().unwrap();
    let jobs = format!(
        r#"
[[job]]
name = "archive"
single-pass = true
[job.source]
kind = "paginated-html"
url-template = "{uri}/archive/{{page}}/"
pattern = "\\.nc$"
"#,
        uri = server.uri()
    );
    let config = load(&create_test_config(&dir, &jobs));

    let results = run_in_process(&config).await;
    assert_eq!(results[0].1.as_ref().unwrap().collected_total, 2);
    assert_eq!(read_stored(&dir, "archive", "p2.nc"), "two");
}

#[tokio::test]
async fn test_category_limit_admits_one_per_category() {
    let server = MockServer::start().await;
    serve_listing(
        &server,
        "/latest/",
        &["a1.nc", "a2.nc", "b1.grib2", "b2.grib2", "c1.txt"],
    )
    .await;
    for file in ["a1.nc", "a2.nc", "b1.grib2", "b2.grib2"] {
        serve_file(&server, file, file).await;
    }

    let dir = TempDir::new().unwrap();
    let jobs = format!(
        r#"
[[job]]
name = "mixed"
limit = 1
categories = ["nc", "grib2"]
[job.source]
kind = "single-page-html"
url = "{uri}/latest/"
pattern = "\\.(nc|grib2|txt)$"
"#,
        uri = server.uri()
    );
    let config = load(&create_test_config(&dir, &jobs));

    let results = run_in_process(&config).await;
    let outcome = results[0].1.as_ref().unwrap();
    assert_eq!(outcome.collected_total, 2);
    assert_eq!(outcome.exit_reason, ExitReason::LimitReached);
    assert_eq!(read_stored(&dir, "mixed", "a1.nc"), "a1.nc");
    assert_eq!(read_stored(&dir, "mixed", "b1.grib2"), "b1.grib2");
    assert_eq!(seen_count(&dir, "mixed"), 2);
}

#[tokio::test]
async fn test_transient_server_error_is_retried() {
    let server = MockServer::start().await;
    serve_listing(&server, "/latest/", &["flaky.nc"]).await;
    Mock::given(method("GET"))
        .and(path("/data/flaky.nc"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    serve_file(&server, "flaky.nc", "finally").await;

    let dir = TempDir::new().unwrap();
    let jobs = format!(
        r#"
[[job]]
name = "flaky"
single-pass = true
[job.source]
kind = "single-page-html"
url = "{uri}/latest/"
pattern = "\\.nc$"
"#,
        uri = server.uri()
    );
    let config = load(&create_test_config(&dir, &jobs));

    let results = run_in_process(&config).await;
    let outcome = results[0].1.as_ref().unwrap();
    assert_eq!(outcome.stats.errors, 0);
    assert_eq!(read_stored(&dir, "flaky", "flaky.nc"), "finally");
}

#[tokio::test]
async fn test_shutdown_ends_polling_job() {
    let server = MockServer::start().await;
    serve_listing(&server, "/latest/", &["a.nc"]).await;
    serve_file(&server, "a.nc", "alpha").await;

    let dir = TempDir::new().unwrap();
    let jobs = format!(
        r#"
[[job]]
name = "poller"
poll-interval-secs = 3600
[job.source]
kind = "single-page-html"
url = "{uri}/latest/"
pattern = "\\.nc$"
"#,
        uri = server.uri()
    );
    let config = load(&create_test_config(&dir, &jobs));

    let factory = ConfigJobFactory::new(Arc::clone(&config)).unwrap();
    let launcher = Arc::new(InProcessLauncher::new(Arc::new(factory)));
    let orchestrator = Arc::new(ProcessPoolOrchestrator::from_config(&config, launcher).unwrap());

    let running = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.run().await }
    });

    // Wait for the first run to land its file, then ask everything to stop
    let stored = dir.path().join("files/poller/a.nc");
    for _ in 0..100 {
        if stored.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    orchestrator.shutdown();

    let results = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("shutdown should end the job within the grace period")
        .unwrap();
    let outcome = results[0].1.as_ref().unwrap();
    assert_eq!(outcome.exit_reason, ExitReason::Shutdown);
    assert_eq!(outcome.runs, 1);
}

fn write_config(dir: &TempDir, toml: &str) -> std::path::PathBuf {
    let path = dir.path().join("harvest.toml");
    std::fs::write(&path, toml).unwrap();
    path
}

fn worker_launcher(config_path: &Path) -> Arc<dyn JobLauncher> {
    Arc::new(ProcessLauncher::new(
        env!("CARGO_BIN_EXE_sumi-harvest"),
        config_path,
    ))
}

#[tokio::test]
async fn test_worker_process_reports_outcome() {
    let server = MockServer::start().await;
    serve_listing(&server, "/latest/", &["a.nc", "b.nc"]).await;
    serve_file(&server, "a.nc", "alpha").await;
    serve_file(&server, "b.nc", "bravo").await;

    let dir = TempDir::new().unwrap();
    let jobs = format!(
        r#"
[[job]]
name = "remote"
single-pass = true
[job.source]
kind = "single-page-html"
url = "{uri}/latest/"
pattern = "\\.nc$"

[[job]]
name = "missing"
single-pass = true
[job.source]
kind = "single-page-html"
url = "{uri}/nothing/"
pattern = "\\.nc$"
"#,
        uri = server.uri()
    );
    let toml = create_test_config(&dir, &jobs);
    let config = load(&toml);
    let config_path = write_config(&dir, &toml);

    let orchestrator =
        ProcessPoolOrchestrator::from_config(&config, worker_launcher(&config_path)).unwrap();
    let results = orchestrator.run().await;

    let remote = results[0].1.as_ref().expect("worker should report success");
    assert_eq!(remote.collected_total, 2);
    assert_eq!(read_stored(&dir, "remote", "b.nc"), "bravo");

    // A permanent 404 stays inside the job as a failed run
    let missing = results[1].1.as_ref().expect("permanent errors do not fail the job");
    assert_eq!(missing.collected_total, 0);
    assert_eq!(missing.failed_runs, 1);
}

#[tokio::test]
async fn test_worker_process_honours_shutdown() {
    let server = MockServer::start().await;
    serve_listing(&server, "/latest/", &["a.nc"]).await;
    serve_file(&server, "a.nc", "alpha").await;

    let dir = TempDir::new().unwrap();
    let jobs = format!(
        r#"
[[job]]
name = "poller"
poll-interval-secs = 3600
[job.source]
kind = "single-page-html"
url = "{uri}/latest/"
pattern = "\\.nc$"
"#,
        uri = server.uri()
    );
    let toml = create_test_config(&dir, &jobs);
    let config = load(&toml);
    let config_path = write_config(&dir, &toml);

    let orchestrator = Arc::new(
        ProcessPoolOrchestrator::from_config(&config, worker_launcher(&config_path)).unwrap(),
    );
    let running = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.run().await }
    });

    let stored = dir.path().join("files/poller/a.nc");
    for _ in 0..250 {
        if stored.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    orchestrator.shutdown();

    let results = tokio::time::timeout(Duration::from_secs(15), running)
        .await
        .expect("worker should exit")
        .unwrap();
    let outcome = results[0].1.as_ref().expect("worker exits cleanly on shutdown");
    assert_eq!(outcome.exit_reason, ExitReason::Shutdown);
}
