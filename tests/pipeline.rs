//! End-to-end runs of the acquisition pipeline against an in-memory M2M service.

use anyhow::{bail, Result};
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::stream::{self, StreamExt};
use landsat_m2m::api::types::*;
use landsat_m2m::api::M2mApi;
use landsat_m2m::error::M2mError;
use landsat_m2m::fetch::{ByteStream, Fetch};
use landsat_m2m::{AcquisitionRequest, Credentials, Pipeline, PollPolicy};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const OT_DATASET: &str = "landsat_ot_c2_l2";
const DOWNLOAD_HOST: &str = "https://dl.example.com/download";

// ============================================================================
// Mock service
// ============================================================================

#[derive(Default)]
struct MockService {
    scenes: HashMap<String, Vec<SceneRecord>>,
    options: HashMap<String, Vec<DownloadOption>>,
    failing_options: HashSet<String>,
    /// product id -> file name reported with the staged download
    file_names: HashMap<String, String>,
    /// How many requested items are staged only through `download-retrieve`.
    preparing: usize,
    fail_login: bool,
    fail_logout: bool,
    fail_download_request: bool,
    calls: Mutex<Vec<&'static str>>,
    requested: Mutex<Vec<DownloadRequestItem>>,
    staging: Mutex<Vec<RemoteDownload>>,
}

impl MockService {
    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    fn requested_products(&self) -> Vec<String> {
        self.requested
            .lock()
            .unwrap()
            .iter()
            .map(|item| item.product_id.clone())
            .collect()
    }

    fn staged(&self, item: &DownloadRequestItem) -> RemoteDownload {
        RemoteDownload {
            download_id: None,
            entity_id: Some(item.entity_id.clone()),
            url: Some(format!("{DOWNLOAD_HOST}/{}", item.product_id)),
            file_name: self.file_names.get(&item.product_id).cloned(),
        }
    }
}

fn remote_error(code: &str) -> M2mError {
    M2mError::RemoteService {
        code: code.to_string(),
        message: "mock failure".to_string(),
    }
}

impl M2mApi for &MockService {
    async fn login(&self, credentials: &Credentials) -> Result<ApiKey, M2mError> {
        self.record("login");
        assert_eq!(credentials.username, "user");
        if self.fail_login {
            return Err(remote_error("AUTH_INVALID"));
        }
        Ok(ApiKey("session".to_string()))
    }

    async fn scene_search(
        &self,
        api_key: &ApiKey,
        request: &SceneSearchRequest,
    ) -> Result<SceneSearchResponse, M2mError> {
        self.record("scene-search");
        assert_eq!(api_key.0, "session");
        Ok(SceneSearchResponse {
            results: self
                .scenes
                .get(&request.dataset_name)
                .cloned()
                .unwrap_or_default(),
        })
    }

    async fn download_options(
        &self,
        _: &ApiKey,
        request: &DownloadOptionsRequest,
    ) -> Result<Vec<DownloadOption>, M2mError> {
        self.record("download-options");
        if self.failing_options.contains(&request.dataset_name) {
            return Err(remote_error("DOWNLOAD_OPTIONS_ERROR"));
        }
        Ok(self
            .options
            .get(&request.dataset_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn download_request(
        &self,
        _: &ApiKey,
        body: &DownloadRequestBody,
    ) -> Result<DownloadRequestResponse, M2mError> {
        self.record("download-request");
        if self.fail_download_request {
            return Err(remote_error("DOWNLOAD_REQUEST_ERROR"));
        }
        self.requested
            .lock()
            .unwrap()
            .extend(body.downloads.iter().cloned());

        let mut response = DownloadRequestResponse::default();
        for (i, item) in body.downloads.iter().enumerate() {
            if i < self.preparing {
                self.staging.lock().unwrap().push(self.staged(item));
                response.preparing_downloads.push(RemoteDownload {
                    url: None,
                    ..self.staged(item)
                });
            } else {
                response.available_downloads.push(self.staged(item));
            }
        }
        Ok(response)
    }

    async fn download_retrieve(
        &self,
        _: &ApiKey,
        _: &str,
    ) -> Result<DownloadRetrieveResponse, M2mError> {
        self.record("download-retrieve");
        Ok(DownloadRetrieveResponse {
            available: self.staging.lock().unwrap().clone(),
        })
    }

    async fn logout(&self, _: &ApiKey) -> Result<(), M2mError> {
        self.record("logout");
        if self.fail_logout {
            return Err(remote_error("LOGOUT_ERROR"));
        }
        Ok(())
    }
}

// ============================================================================
// Mock fetcher
// ============================================================================

#[derive(Default)]
struct MockFetcher {
    failing: HashSet<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
}

impl Fetch for &MockFetcher {
    async fn open(&self, url: &str) -> Result<ByteStream> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(url) {
            bail!("HTTP status server error (500 Internal Server Error) for url ({url})");
        }
        let body = if url.contains("/P_") {
            bundle_bytes(url)
        } else {
            format!("band data from {url}").into_bytes()
        };
        let chunks = body
            .chunks(64)
            .map(|chunk| Ok::<_, anyhow::Error>(Bytes::copy_from_slice(chunk)))
            .collect::<Vec<_>>();
        Ok(stream::iter(chunks).boxed())
    }
}

/// A small gzipped tarball standing in for a Level-2 bundle.
fn bundle_bytes(url: &str) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    let content = format!("surface reflectance for {url}");
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "SR_B4.TIF", content.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

// ============================================================================
// Fixtures
// ============================================================================

fn credentials() -> Credentials {
    Credentials::new("user", "token")
}

fn fast_poll() -> PollPolicy {
    PollPolicy {
        max_attempts: 10,
        interval: Duration::from_millis(1),
    }
}

fn request(output: &Path) -> AcquisitionRequest {
    AcquisitionRequest {
        output_directory: output.to_string_lossy().into_owned(),
        start_date: "2022-01-01".to_string(),
        end_date: "2022-01-31".to_string(),
        bounding_box: "-120.0,35.0,-119.0,36.0".to_string(),
        max_cloud_cover: 20.0,
        landsat_sensors: vec!["L8".to_string(), "L9".to_string()],
        ..AcquisitionRequest::default()
    }
}

fn scene(entity: &str, display: &str) -> SceneRecord {
    SceneRecord {
        entity_id: Some(entity.to_string()),
        display_id: Some(display.to_string()),
    }
}

fn band_file(display: &str, band: &str) -> String {
    format!("{display}_SR_{band}.TIF")
}

/// `count` OT scenes, each with an available bundle carrying B2, B3 and B5 band files.
fn service_with_scenes(count: usize) -> MockService {
    let mut service = MockService::default();
    let mut records = vec![];
    let mut options = vec![];
    for i in 0..count {
        let entity = format!("LC8042035202201{i:02}LGN00");
        let display = format!("LC08_L2SP_042035_202201{i:02}_02_T1");
        records.push(scene(&entity, &display));

        let secondary_downloads = ["B2", "B3", "B5"]
            .iter()
            .map(|band| {
                let product = format!("S_{entity}_{band}");
                let file = band_file(&display, band);
                service.file_names.insert(product.clone(), file.clone());
                DownloadOption {
                    id: Some(product),
                    entity_id: Some(format!("{entity}_{band}")),
                    display_id: Some(file),
                    available: true,
                    secondary_downloads: vec![],
                }
            })
            .collect();
        options.push(DownloadOption {
            id: Some(format!("P_{entity}")),
            entity_id: Some(entity.clone()),
            display_id: Some(display.clone()),
            available: true,
            secondary_downloads,
        });
    }
    service.scenes.insert(OT_DATASET.to_string(), records);
    service.options.insert(OT_DATASET.to_string(), options);
    service
}

fn pipeline<'a>(
    service: &'a MockService,
    fetcher: &'a MockFetcher,
) -> Pipeline<&'a MockService, &'a MockFetcher> {
    Pipeline::new(service, fetcher, credentials()).with_poll_policy(fast_poll())
}

fn success(output: &Path, count: usize) -> String {
    format!("Successfully downloaded {count} files to {}.", output.display())
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_validation_errors_issue_no_calls() {
    let dir = tempfile::tempdir().unwrap();
    let service = MockService::default();
    let fetcher = MockFetcher::default();
    let pipeline = pipeline(&service, &fetcher);

    let cases = [
        ("bounding_box", "-200.0,35.0,-119.0,36.0", "out of range"),
        ("bounding_box", "-120.0,35.0,-119.0,95.0", "out of range"),
        ("bounding_box", "-120.0,35.0,-119.0", "Invalid bounding_box format"),
        ("bounding_box", "west,35.0,-119.0,36.0", "Invalid bounding_box format"),
        ("start_date", "01/01/2022", "Invalid date format"),
        ("end_date", "2022-13-01", "Invalid date format"),
        ("output_directory", "", "are required"),
        ("start_date", "", "are required"),
        ("end_date", "", "are required"),
        ("bounding_box", "", "are required"),
    ];
    for (field, value, expected) in cases {
        let mut request = request(dir.path());
        match field {
            "bounding_box" => request.bounding_box = value.to_string(),
            "start_date" => request.start_date = value.to_string(),
            "end_date" => request.end_date = value.to_string(),
            _ => request.output_directory = value.to_string(),
        }
        let summary = pipeline.execute(&request).await;
        assert!(summary.starts_with("Error:"), "{field}={value}: {summary}");
        assert!(summary.contains(expected), "{field}={value}: {summary}");
    }
    assert!(service.calls().is_empty());
}

// ============================================================================
// Session lifecycle and terminal outcomes
// ============================================================================

#[tokio::test]
async fn test_login_failure_stops_everything() {
    let dir = tempfile::tempdir().unwrap();
    let mut service = service_with_scenes(2);
    service.fail_login = true;
    let fetcher = MockFetcher::default();

    let summary = pipeline(&service, &fetcher).execute(&request(dir.path())).await;
    assert_eq!(summary, "Login failed: AUTH_INVALID: mock failure");
    assert_eq!(service.calls(), vec!["login"]);
}

#[tokio::test]
async fn test_invalid_sensor_aborts_and_logs_out() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with_scenes(2);
    let fetcher = MockFetcher::default();
    let mut request = request(dir.path());
    request.landsat_sensors = vec!["L8".to_string(), "L4".to_string()];

    let summary = pipeline(&service, &fetcher).execute(&request).await;
    assert_eq!(summary, "Error: Invalid sensor 'L4'.");
    assert_eq!(service.calls(), vec!["login", "logout"]);
}

#[tokio::test]
async fn test_no_scenes_logs_out() {
    let dir = tempfile::tempdir().unwrap();
    let service = MockService::default();
    let fetcher = MockFetcher::default();

    let summary = pipeline(&service, &fetcher).execute(&request(dir.path())).await;
    assert_eq!(summary, "No scenes found.");
    assert_eq!(service.count("scene-search"), 2);
    assert_eq!(service.count("download-options"), 0);
    assert_eq!(service.calls().last(), Some(&"logout"));
}

#[tokio::test]
async fn test_unusable_output_directory_issues_no_calls() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, b"file").unwrap();
    let service = service_with_scenes(1);
    let fetcher = MockFetcher::default();

    let summary = pipeline(&service, &fetcher)
        .execute(&request(&blocker.join("scenes")))
        .await;
    assert!(summary.starts_with("Error: unable to create output directory"));
    assert!(service.calls().is_empty());
}

#[tokio::test]
async fn test_empty_sensor_list_searches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with_scenes(2);
    let fetcher = MockFetcher::default();
    let mut request = request(dir.path());
    request.landsat_sensors.clear();

    let summary = pipeline(&service, &fetcher).execute(&request).await;
    assert_eq!(summary, "No scenes found.");
    assert_eq!(service.calls(), vec!["login", "logout"]);
}

#[tokio::test]
async fn test_no_downloads_logs_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut service = service_with_scenes(2);
    for option in service.options.get_mut(OT_DATASET).unwrap() {
        option.available = false;
    }
    let fetcher = MockFetcher::default();

    let summary = pipeline(&service, &fetcher).execute(&request(dir.path())).await;
    assert_eq!(summary, "No available downloads found.");
    assert_eq!(service.count("download-request"), 0);
    assert_eq!(service.count("logout"), 1);
}

#[tokio::test]
async fn test_failed_dataset_options_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut service = service_with_scenes(2);
    service.failing_options.insert(OT_DATASET.to_string());
    let fetcher = MockFetcher::default();

    let summary = pipeline(&service, &fetcher).execute(&request(dir.path())).await;
    assert_eq!(summary, "No available downloads found.");
    assert_eq!(service.count("logout"), 1);
}

#[tokio::test]
async fn test_download_request_failure_logs_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut service = service_with_scenes(1);
    service.fail_download_request = true;
    let fetcher = MockFetcher::default();

    let summary = pipeline(&service, &fetcher).execute(&request(dir.path())).await;
    assert_eq!(
        summary,
        "Download request failed: DOWNLOAD_REQUEST_ERROR: mock failure"
    );
    assert_eq!(service.calls().last(), Some(&"logout"));
    assert_eq!(fetcher.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_logout_failure_keeps_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let mut service = service_with_scenes(1);
    service.fail_logout = true;
    let fetcher = MockFetcher::default();

    let summary = pipeline(&service, &fetcher).execute(&request(dir.path())).await;
    assert_eq!(summary, success(dir.path(), 1));
    assert_eq!(service.count("logout"), 1);
}

// ============================================================================
// Bundle and band retrieval
// ============================================================================

#[tokio::test]
async fn test_bundle_download_extracts_and_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with_scenes(2);
    let fetcher = MockFetcher::default();

    let summary = pipeline(&service, &fetcher).execute(&request(dir.path())).await;
    assert_eq!(summary, success(dir.path(), 2));

    // L8 and L9 share a dataset; each scene is still requested once.
    assert_eq!(service.count("scene-search"), 2);
    assert_eq!(service.count("download-options"), 1);
    assert_eq!(service.requested_products().len(), 2);

    for i in 0..2 {
        let display = format!("LC08_L2SP_042035_202201{i:02}_02_T1");
        let extracted = dir.path().join(&display).join("SR_B4.TIF");
        assert!(extracted.exists(), "missing {}", extracted.display());
        assert!(!dir.path().join(format!("{display}.tar.gz")).exists());
    }
    assert_eq!(service.calls().last(), Some(&"logout"));
}

#[tokio::test]
async fn test_bundle_download_keeps_archives() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with_scenes(1);
    let fetcher = MockFetcher::default();
    let mut request = request(dir.path());
    request.delete_archive = false;

    let summary = pipeline(&service, &fetcher).execute(&request).await;
    assert_eq!(summary, success(dir.path(), 1));
    let display = "LC08_L2SP_042035_20220100_02_T1";
    assert!(dir.path().join(format!("{display}.tar.gz")).exists());
    assert!(dir.path().join(display).join("SR_B4.TIF").exists());
}

#[tokio::test]
async fn test_band_mode_selects_requested_bands() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with_scenes(1);
    let fetcher = MockFetcher::default();
    let mut request = request(dir.path());
    request.bands = Some(vec!["B2".to_string(), "b3".to_string(), "B4".to_string()]);

    let summary = pipeline(&service, &fetcher).execute(&request).await;
    assert_eq!(summary, success(dir.path(), 2));

    let entity = "LC804203520220100LGN00";
    assert_eq!(
        service.requested_products(),
        vec![format!("S_{entity}_B2"), format!("S_{entity}_B3")]
    );

    let display = "LC08_L2SP_042035_20220100_02_T1";
    assert!(dir.path().join(band_file(display, "B2")).exists());
    assert!(dir.path().join(band_file(display, "B3")).exists());
    assert!(!dir.path().join(band_file(display, "B5")).exists());
}

#[tokio::test]
async fn test_pending_downloads_are_polled() {
    let dir = tempfile::tempdir().unwrap();
    let mut service = service_with_scenes(3);
    service.preparing = 2;
    let fetcher = MockFetcher::default();

    let summary = pipeline(&service, &fetcher).execute(&request(dir.path())).await;
    assert_eq!(summary, success(dir.path(), 3));
    assert_eq!(service.count("download-retrieve"), 1);
}

#[tokio::test]
async fn test_write_plan() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with_scenes(2);
    let fetcher = MockFetcher::default();
    let mut request = request(dir.path());
    request.write_plan = true;

    pipeline(&service, &fetcher).execute(&request).await;
    let plan = landsat_m2m::download_plan::DownloadPlan::read(
        dir.path().join(landsat_m2m::pipeline::PLAN_FILE_NAME),
    )
    .await
    .unwrap();
    assert_eq!(plan.tasks().len(), 2);
    assert!(plan.tasks().iter().all(|task| task.extract_to.is_some()));
}

// ============================================================================
// Concurrency and isolation
// ============================================================================

#[tokio::test]
async fn test_concurrency_bound() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with_scenes(12);
    let fetcher = MockFetcher {
        delay: Duration::from_millis(20),
        ..MockFetcher::default()
    };
    let mut request = request(dir.path());
    request.max_concurrent_downloads = 3;

    let summary = pipeline(&service, &fetcher).execute(&request).await;
    assert_eq!(summary, success(dir.path(), 12));
    let peak = fetcher.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak in-flight was {peak}");
    assert!(peak >= 1);
}

#[tokio::test]
async fn test_failed_item_does_not_affect_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with_scenes(4);
    let broken = format!("{DOWNLOAD_HOST}/P_LC804203520220102LGN00");
    let fetcher = MockFetcher {
        failing: HashSet::from([broken]),
        ..MockFetcher::default()
    };

    let summary = pipeline(&service, &fetcher).execute(&request(dir.path())).await;
    assert_eq!(summary, success(dir.path(), 3));
    assert_eq!(fetcher.opened.load(Ordering::SeqCst), 4);
    assert!(!dir.path().join("LC08_L2SP_042035_20220102_02_T1").exists());
}

#[tokio::test]
async fn test_repeated_runs_are_identical() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with_scenes(2);
    let fetcher = MockFetcher::default();
    let mut request = request(dir.path());
    request.bands = Some(vec!["B2".to_string()]);
    let pipeline = pipeline(&service, &fetcher);

    let list = |path: &Path| {
        let mut names: Vec<_> = std::fs::read_dir(path)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        names.sort();
        names
    };

    let first = pipeline.execute(&request).await;
    let first_files = list(dir.path());
    let second = pipeline.execute(&request).await;
    assert_eq!(first, second);
    assert_eq!(first, success(dir.path(), 2));
    assert_eq!(first_files, list(dir.path()));
}
