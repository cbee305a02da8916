//! HTTP transfer backend.
//!
//! Each running transfer is a tokio task streaming a GET response to disk.
//!
//! - **Pause** stops the task and keeps the partial file.
//! - **Resume** starts a new task that continues from the partial file's
//!   length with a `Range` request (servers that ignore it restart from 0).
//! - **Cancel** stops the task and deletes the partial file.
//!
//! Every report goes through the [`ProgressReporter`] handed over on
//! `start`, so a resumed run reports under the original lease.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::header::{RANGE, USER_AGENT};
use reqwest::{StatusCode, Url};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ferry_core::{
    BackendHandle, ProgressReporter, ProgressUpdate, TransferBackend, TransferError, TransferId,
    TransferKind, TransferRecord,
};

/// Minimum spacing between progress reports for one transfer.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const AGENT: &str = concat!("ferry/", env!("CARGO_PKG_VERSION"));

/// Where one transfer reads from and writes to.
#[derive(Debug)]
struct DownloadRequest {
    url: Url,
    path: PathBuf,
}

/// Controls for one run (start or resume) of a transfer.
#[derive(Debug, Clone)]
struct RunControl {
    id: u64,
    token: CancellationToken,
    /// Delete the partial file once the run stops.
    discard: Arc<AtomicBool>,
}

#[derive(Debug)]
struct HttpJob {
    request: Arc<DownloadRequest>,
    reporter: ProgressReporter,
    /// `None` while paused.
    run: Option<RunControl>,
}

type JobTable = Arc<Mutex<HashMap<BackendHandle, HttpJob>>>;

/// [`TransferBackend`] for `http(s)://` locators.
pub struct HttpBackend {
    client: reqwest::Client,
    next_handle: AtomicU64,
    next_run: AtomicU64,
    jobs: JobTable,
}

impl HttpBackend {
    /// Create a backend with its own HTTP client.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Create a backend around an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            next_handle: AtomicU64::new(1),
            next_run: AtomicU64::new(1),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of transfers this backend still tracks.
    pub fn tracked(&self) -> usize {
        lock(&self.jobs).len()
    }

    fn spawn_run(
        &self,
        handle: BackendHandle,
        request: &Arc<DownloadRequest>,
        reporter: ProgressReporter,
    ) -> RunControl {
        let control = RunControl {
            id: self.next_run.fetch_add(1, Ordering::SeqCst),
            token: CancellationToken::new(),
            discard: Arc::new(AtomicBool::new(false)),
        };

        let task = DownloadTask {
            client: self.client.clone(),
            request: Arc::clone(request),
            reporter,
            control: control.clone(),
            jobs: Arc::clone(&self.jobs),
            handle,
        };
        tokio::spawn(task.run());
        control
    }
}

impl TransferBackend for HttpBackend {
    fn kind(&self) -> TransferKind {
        TransferKind::Http
    }

    fn start(
        &self,
        record: &TransferRecord,
        reporter: ProgressReporter,
    ) -> Result<BackendHandle, TransferError> {
        let url = parse_locator(&record.locator)?;
        let path = target_path(&record.destination, &url, &record.id);
        let request = Arc::new(DownloadRequest { url, path });

        let handle = BackendHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        debug!(
            target: "ferry.http",
            id = %record.id,
            handle = handle.value(),
            url = %request.url,
            path = %request.path.display(),
            "Starting download"
        );

        // Hold the table while spawning so the run cannot finish before its job exists.
        let mut jobs = lock(&self.jobs);
        let run = self.spawn_run(handle, &request, reporter.clone());
        jobs.insert(
            handle,
            HttpJob {
                request,
                reporter,
                run: Some(run),
            },
        );
        Ok(handle)
    }

    fn pause(&self, handle: BackendHandle) {
        let mut jobs = lock(&self.jobs);
        if let Some(run) = jobs.get_mut(&handle).and_then(|job| job.run.take()) {
            debug!(target: "ferry.http", handle = handle.value(), "Pausing download");
            run.token.cancel();
        }
    }

    fn resume(&self, handle: BackendHandle) {
        let mut jobs = lock(&self.jobs);
        let Some(job) = jobs.get_mut(&handle) else {
            warn!(target: "ferry.http", handle = handle.value(), "Resume for unknown download");
            return;
        };
        if job.run.is_none() {
            debug!(target: "ferry.http", handle = handle.value(), "Resuming download");
            job.run = Some(self.spawn_run(handle, &job.request, job.reporter.clone()));
        }
    }

    fn cancel(&self, handle: BackendHandle) {
        let Some(job) = lock(&self.jobs).remove(&handle) else {
            return;
        };
        debug!(target: "ferry.http", handle = handle.value(), "Cancelling download");

        match job.run {
            Some(run) => {
                run.discard.store(true, Ordering::SeqCst);
                run.token.cancel();
            }
            None => {
                let path = job.request.path.clone();
                tokio::spawn(async move { discard_partial(&path).await });
            }
        }
    }
}

/// One run of a download, from spawn until it stops or finishes.
struct DownloadTask {
    client: reqwest::Client,
    request: Arc<DownloadRequest>,
    reporter: ProgressReporter,
    control: RunControl,
    jobs: JobTable,
    handle: BackendHandle,
}

impl DownloadTask {
    async fn run(self) {
        let result = tokio::select! {
            biased;
            () = self.control.token.cancelled() => None,
            result = fetch_to_file(&self.client, &self.request, &self.reporter) => Some(result),
        };

        let Some(result) = result else {
            if self.control.discard.load(Ordering::SeqCst) {
                discard_partial(&self.request.path).await;
            }
            return;
        };

        match result {
            Ok(()) => {
                debug!(target: "ferry.http", handle = self.handle.value(), "Download finished");
                self.reporter.done();
            }
            Err(error) => {
                debug!(target: "ferry.http", handle = self.handle.value(), %error, "Download failed");
                self.reporter.failed(error);
            }
        }

        retire_job(&self.jobs, self.handle, self.control.id);
    }
}

/// Forget a job whose run `run_id` finished.
///
/// A pause that lands after the run finished has already taken the run, so
/// a job with no run is dropped as well. A newer run (a resume) keeps it.
fn retire_job(jobs: &JobTable, handle: BackendHandle, run_id: u64) -> bool {
    let mut jobs = lock(jobs);
    let finished = jobs
        .get(&handle)
        .is_some_and(|job| job.run.as_ref().is_none_or(|run| run.id == run_id));
    if finished {
        jobs.remove(&handle);
    }
    finished
}

/// Stream `request.url` into `request.path`, continuing a partial file.
async fn fetch_to_file(
    client: &reqwest::Client,
    request: &DownloadRequest,
    reporter: &ProgressReporter,
) -> Result<(), TransferError> {
    let offset = tokio::fs::metadata(&request.path)
        .await
        .map_or(0, |meta| meta.len());

    let mut builder = client.get(request.url.clone()).header(USER_AGENT, AGENT);
    if offset > 0 {
        builder = builder.header(RANGE, format!("bytes={offset}-"));
    }
    let response = builder.send().await.map_err(|e| classify_error(&e))?;

    let status = response.status();
    if offset > 0 && status == StatusCode::RANGE_NOT_SATISFIABLE {
        // Nothing past the partial file: it is already complete.
        reporter.progress(ProgressUpdate::new(offset, Some(offset)));
        return Ok(());
    }
    if !status.is_success() {
        return Err(status_error(status, &request.url));
    }

    let start = if offset > 0 && status == StatusCode::PARTIAL_CONTENT {
        offset
    } else {
        0
    };
    let total = response.content_length().map(|len| start + len);

    let mut file = open_target(&request.path, start > 0)
        .await
        .map_err(|e| TransferError::from_io_error(&e))?;

    let mut downloaded = start;
    let mut last_report = Instant::now();
    reporter.progress(ProgressUpdate::new(downloaded, total));

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| classify_error(&e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| TransferError::from_io_error(&e))?;
        downloaded += chunk.len() as u64;

        if last_report.elapsed() >= PROGRESS_INTERVAL {
            reporter.progress(ProgressUpdate::new(downloaded, total));
            last_report = Instant::now();
        }
    }
    file.flush()
        .await
        .map_err(|e| TransferError::from_io_error(&e))?;

    if let Some(total) = total {
        if downloaded < total {
            return Err(TransferError::network(format!(
                "connection closed after {downloaded} of {total} bytes"
            )));
        }
    }
    reporter.progress(ProgressUpdate::new(downloaded, total.or(Some(downloaded))));
    Ok(())
}

async fn open_target(path: &Path, append: bool) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    if append {
        OpenOptions::new().append(true).open(path).await
    } else {
        File::create(path).await
    }
}

async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(target: "ferry.http", path = %path.display(), "Removed partial download"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(target: "ferry.http", path = %path.display(), error = %e, "Failed to remove partial download");
        }
    }
}

fn lock(jobs: &JobTable) -> MutexGuard<'_, HashMap<BackendHandle, HttpJob>> {
    jobs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Parse and check an HTTP locator.
fn parse_locator(locator: &str) -> Result<Url, TransferError> {
    let url = Url::parse(locator.trim())
        .map_err(|e| TransferError::invalid_locator(locator, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(TransferError::invalid_locator(
            locator,
            format!("unsupported scheme '{other}'"),
        )),
    }
}

/// File a transfer writes to.
///
/// An existing directory (or a path ending in a separator) receives the
/// URL's last path segment, falling back to the transfer id. Anything else is
/// used as the file path itself.
fn target_path(destination: &Path, url: &Url, id: &TransferId) -> PathBuf {
    let is_dir = destination.is_dir()
        || destination
            .as_os_str()
            .to_string_lossy()
            .ends_with(std::path::MAIN_SEPARATOR);
    if !is_dir {
        return destination.to_path_buf();
    }

    let file_name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map_or_else(|| id.as_str().to_string(), str::to_string);
    destination.join(file_name)
}

/// Classify a non-success HTTP status.
fn status_error(status: StatusCode, url: &Url) -> TransferError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            TransferError::not_found(format!("{url} ({status})"))
        }
        _ => TransferError::http_status(format!("{url} returned {status}"), status.as_u16()),
    }
}

/// Classify a client error.
fn classify_error(err: &reqwest::Error) -> TransferError {
    if err.is_timeout() {
        TransferError::timeout(err.to_string())
    } else if err.is_connect() {
        TransferError::connection(err.to_string())
    } else if let Some(status) = err.status() {
        TransferError::http_status(err.to_string(), status.as_u16())
    } else {
        TransferError::network(err.to_string())
    }
}
