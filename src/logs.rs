//! Job log download and cleanup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use log::{debug, info};
use regex::Regex;
use reqwest::header::LOCATION;
use reqwest::{Client, Method, Response};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::http::{encode_path_segment, status_error, RateLimitedClient};

/// Downloads are capped to keep a huge log from exhausting memory.
pub const MAX_LOG_BYTES: usize = 10 * 1024 * 1024;

pub const DEFAULT_LOG_DEADLINE: Duration = Duration::from_secs(30);

const NOT_AVAILABLE: &str =
    "Log not available. The job may still be running or logs may have expired.";
const TIMED_OUT: &str = "Log download timed out. The log may be very large.";
const TRUNCATED_NOTICE: &str =
    "\n\n--- Log truncated at 10MB. Open the job in a browser to view the full log. ---";

// CSI sequences: colors, formatting, cursor movement.
static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[a-zA-Z]").unwrap());

// "2024-01-15T10:30:45.1234567Z " at the start of a line.
static TIMESTAMP_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d+Z ").unwrap());

/// Strip escape sequences and per-line timestamps.
///
/// Escape stripping repeats until nothing changes, since removing one sequence can
/// expose another. Timestamps come off once per line: whatever follows the runner's
/// prefix is log content and is kept byte for byte, even when it starts with
/// something that looks like a timestamp.
pub fn sanitize_log(raw: &str) -> String {
    let mut current = raw.to_string();
    loop {
        let next = ANSI_ESCAPE.replace_all(&current, "").into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    TIMESTAMP_PREFIX.replace_all(&current, "").into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLog {
    pub text: String,
    /// Bytes read from the wire, at most the retriever's cap.
    pub raw_bytes: usize,
    pub cap: usize,
}

impl JobLog {
    /// True when the download stopped at the cap; the log may continue past it.
    pub fn reached_cap(&self) -> bool {
        self.raw_bytes >= self.cap
    }
}

/// Fetches a single job's log: asks the API for the short-lived download URL, then
/// pulls the file directly with a size cap and a deadline.
pub struct LogRetriever {
    client: Arc<RateLimitedClient>,
    download: Client,
    max_bytes: usize,
    deadline: Duration,
}

impl LogRetriever {
    pub fn new(client: Arc<RateLimitedClient>, download: Client) -> Self {
        Self {
            client,
            download,
            max_bytes: MAX_LOG_BYTES,
            deadline: DEFAULT_LOG_DEADLINE,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes.max(1);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Fetch and sanitize. Cancellation yields [`ApiError::Cancelled`]; running past
    /// the deadline yields [`ApiError::Timeout`].
    pub async fn fetch(
        &self,
        owner: &str,
        repo: &str,
        job_id: i64,
        cancel: &CancellationToken,
    ) -> Result<JobLog, ApiError> {
        match tokio::time::timeout(self.deadline, self.fetch_inner(owner, repo, job_id, cancel))
            .await
        {
            Ok(res) => res,
            Err(_) => Err(ApiError::Timeout(self.deadline)),
        }
    }

    async fn fetch_inner(
        &self,
        owner: &str,
        repo: &str,
        job_id: i64,
        cancel: &CancellationToken,
    ) -> Result<JobLog, ApiError> {
        let path = format!(
            "/repos/{}/{}/actions/jobs/{}/logs",
            encode_path_segment(owner),
            encode_path_segment(repo),
            job_id
        );
        let request = self.client.rest_request(Method::GET, &path, &[])?;
        let gated = self.client.execute(request, cancel).await?;

        // A direct 200 is read while the API permit is held; a redirect hands
        // the body to blob storage, which is not an API call and skips the gate.
        let (res, _permit) = if gated.status().is_redirection() {
            let location = gated
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| ApiError::InvalidRequest("log redirect without Location".into()))?;
            let url = gated
                .url()
                .join(location)
                .map_err(|e| ApiError::InvalidRequest(format!("bad log URL: {}", e)))?;
            drop(gated);
            debug!("downloading log for job {} from {}", job_id, url.host_str().unwrap_or(""));
            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                r = self.download.get(url).send() => r?,
            };
            (res, None)
        } else {
            let (res, permit) = gated.into_parts();
            (res, Some(permit))
        };

        if !res.status().is_success() {
            return Err(error_from_response(res, cancel).await);
        }

        let bytes = read_capped(res, self.max_bytes, cancel).await?;
        info!("job {} log: {} bytes", job_id, bytes.len());
        Ok(JobLog {
            text: sanitize_log(&String::from_utf8_lossy(&bytes)),
            raw_bytes: bytes.len(),
            cap: self.max_bytes,
        })
    }
}

/// Status error from a failed response. The body is best effort, but a
/// cancellation while reading it still reports [`ApiError::Cancelled`].
async fn error_from_response(res: Response, cancel: &CancellationToken) -> ApiError {
    let status = res.status();
    match read_capped(res, 64 * 1024, cancel).await {
        Ok(body) => status_error(status, &String::from_utf8_lossy(&body)),
        Err(e) if e.is_cancelled() => e,
        Err(_) => status_error(status, ""),
    }
}

/// Read at most `max` bytes of the body; the rest is never buffered.
async fn read_capped(
    res: Response,
    max: usize,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, ApiError> {
    let mut stream = res.bytes_stream();
    let mut buf = Vec::new();
    while buf.len() < max {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk?;
        let take = chunk.len().min(max - buf.len());
        buf.extend_from_slice(&chunk[..take]);
    }
    Ok(buf)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    Loaded {
        job_id: i64,
        text: String,
        truncated: bool,
    },
    Failed {
        job_id: i64,
        message: String,
    },
}

/// Handle for a fetch started by [`LogSession::start`].
pub struct PendingLog {
    pub generation: u64,
    handle: JoinHandle<Option<LogOutcome>>,
}

impl PendingLog {
    /// `None` when the fetch was cancelled or superseded.
    pub async fn wait(self) -> Option<LogOutcome> {
        self.handle.await.ok().flatten()
    }
}

/// Keeps at most one log fetch alive. Starting a new fetch cancels the previous
/// one, and a cancelled or superseded fetch never produces an outcome.
pub struct LogSession {
    retriever: Arc<LogRetriever>,
    active: Mutex<Option<CancellationToken>>,
    generation: Arc<AtomicU64>,
}

impl LogSession {
    pub fn new(retriever: Arc<LogRetriever>) -> Self {
        Self {
            retriever,
            active: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn start(&self, owner: &str, repo: &str, job_id: i64) -> PendingLog {
        let cancel = CancellationToken::new();
        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(cancel.clone());
        if let Some(prev) = previous {
            prev.cancel();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let latest = self.generation.clone();
        let retriever = self.retriever.clone();
        let (owner, repo) = (owner.to_string(), repo.to_string());
        let handle = tokio::spawn(async move {
            let result = retriever.fetch(&owner, &repo, job_id, &cancel).await;
            if cancel.is_cancelled() || latest.load(Ordering::SeqCst) != generation {
                debug!("dropping log result for job {} (superseded)", job_id);
                return None;
            }
            match result {
                Ok(log) => {
                    let truncated = log.reached_cap();
                    let mut text = log.text;
                    if truncated {
                        text.push_str(TRUNCATED_NOTICE);
                    }
                    Some(LogOutcome::Loaded {
                        job_id,
                        text,
                        truncated,
                    })
                }
                Err(e) if e.is_cancelled() => None,
                Err(e) => Some(LogOutcome::Failed {
                    job_id,
                    message: failure_message(&e),
                }),
            }
        });
        PendingLog { generation, handle }
    }

    /// Abandon the in-flight fetch, if any (e.g. the user navigated away). Its
    /// generation stops being current.
    pub fn cancel(&self) {
        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = active {
            token.cancel();
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Whether `generation` is still the newest fetch. Check before showing a result.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

pub fn failure_message(err: &ApiError) -> String {
    match err {
        ApiError::NotFound { .. } => NOT_AVAILABLE.to_string(),
        ApiError::Timeout(_) => TIMED_OUT.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use httpmock::{Method::GET, MockServer};

    #[test]
    fn sanitize_cases() {
        let cases = [
            (
                "\x1b[32mPassing\x1b[0m test \x1b[1;31mfailed\x1b[0m",
                "Passing test failed",
            ),
            (
                "2024-01-15T10:30:45.1234567Z Run started\n2024-01-15T10:30:46.9876543Z Step completed",
                "Run started\nStep completed",
            ),
            (
                "2024-01-15T10:30:45.1234567Z \x1b[32mPassing\x1b[0m test",
                "Passing test",
            ),
            ("Hello world\nSecond line", "Hello world\nSecond line"),
            ("\x1b[?25lhidden cursor\x1b[2K", "hidden cursor"),
            // no fractional seconds: not a log timestamp
            ("2024-01-15T10:30:45Z keep", "2024-01-15T10:30:45Z keep"),
        ];
        for (input, want) in cases {
            assert_eq!(sanitize_log(input), want, "input {:?}", input);
        }
    }

    #[test]
    fn sanitize_is_idempotent() {
        let inputs = [
            "\x1b\x1b[0m[31mred\x1b[0m",
            "\x1b[1m2024-01-15T10:30:45.1Z after escape",
            "2024-01-15T10:30:45.1Z \x1b[32mok\x1b[0m\n2024-01-15T10:30:46.1Z done\n",
            "plain\r\nwindows\r\n",
            "",
        ];
        for input in inputs {
            let once = sanitize_log(input);
            assert_eq!(sanitize_log(&once), once, "input {:?}", input);
        }
    }

    #[test]
    fn timestamp_like_content_is_kept() {
        // Only the runner's prefix is removed. Content that itself begins with a
        // timestamp survives the first pass, so a second pass would strip it too:
        // for such lines byte-exact content wins over idempotence.
        let raw = "2024-01-15T10:30:45.1Z 2024-01-15T10:30:45.1Z deployed at build start";
        let once = sanitize_log(raw);
        assert_eq!(once, "2024-01-15T10:30:45.1Z deployed at build start");
        assert_eq!(sanitize_log(&once), "deployed at build start");
    }

    #[test]
    fn timestamp_prefixes_strip_to_original_lines() {
        for n in [1usize, 2, 17, 250] {
            let lines: Vec<String> = (0..n)
                .map(|i| format!("step {i}: résumé {} ok", "x".repeat(i % 7)))
                .collect();
            let raw = lines
                .iter()
                .enumerate()
                .map(|(i, l)| format!("2024-03-{:02}T12:{:02}:{:02}.{:07}Z {}", 1 + i % 28, i % 60, (i * 7) % 60, i, l))
                .collect::<Vec<_>>()
                .join("\n");
            assert_eq!(sanitize_log(&raw), lines.join("\n"));
        }
    }

    fn retriever_for(server: &MockServer) -> LogRetriever {
        let cfg = Config::for_base_url("t", &server.base_url());
        let client = Arc::new(RateLimitedClient::new(cfg.clone()).unwrap());
        let download = crate::http::build_download_client(&cfg).unwrap();
        LogRetriever::new(client, download)
    }

    async fn mock_log(server: &MockServer, job_id: i64, body: Vec<u8>, delay: Option<Duration>) {
        let blob = format!("/blobs/{job_id}.txt");
        let location = server.url(&blob);
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path(format!("/repos/o/r/actions/jobs/{job_id}/logs"));
                then.status(302).header("location", location);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(blob);
                let then = then.status(200).body(body);
                if let Some(d) = delay {
                    then.delay(d);
                }
            })
            .await;
    }

    #[tokio::test]
    async fn follows_redirect_and_sanitizes() {
        let server = MockServer::start_async().await;
        mock_log(
            &server,
            42,
            b"2024-01-15T10:30:45.1234567Z \x1b[32mline1\x1b[0m\n2024-01-15T10:30:46.1Z line2\n".to_vec(),
            None,
        )
        .await;
        let log = retriever_for(&server)
            .fetch("o", "r", 42, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(log.text, "line1\nline2\n");
        assert!(!log.reached_cap());
    }

    #[tokio::test]
    async fn body_over_cap_is_cut_at_cap() {
        let server = MockServer::start_async().await;
        mock_log(&server, 1, vec![b'a'; 1025], None).await;
        mock_log(&server, 2, vec![b'a'; 1023], None).await;
        let retriever = retriever_for(&server).with_max_bytes(1024);
        let cancel = CancellationToken::new();

        let over = retriever.fetch("o", "r", 1, &cancel).await.unwrap();
        assert_eq!(over.raw_bytes, 1024);
        assert_eq!(over.text.len(), 1024);
        assert!(over.reached_cap());

        let under = retriever.fetch("o", "r", 2, &cancel).await.unwrap();
        assert_eq!(under.raw_bytes, 1023);
        assert!(!under.reached_cap());
    }

    #[tokio::test]
    async fn default_cap_is_ten_mebibytes() {
        let server = MockServer::start_async().await;
        mock_log(&server, 7, vec![b'z'; MAX_LOG_BYTES + 1], None).await;
        let log = retriever_for(&server)
            .fetch("o", "r", 7, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(log.raw_bytes, MAX_LOG_BYTES);
        assert!(log.reached_cap());
    }

    #[tokio::test]
    async fn missing_log_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/o/r/actions/jobs/9/logs");
                then.status(404).json_body(serde_json::json!({"message": "Not Found"}));
            })
            .await;
        let err = retriever_for(&server)
            .fetch("o", "r", 9, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(failure_message(&err), NOT_AVAILABLE);
    }

    #[tokio::test]
    async fn download_error_carries_status() {
        let server = MockServer::start_async().await;
        let location = server.url("/blobs/gone.txt");
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/o/r/actions/jobs/5/logs");
                then.status(302).header("location", location);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/blobs/gone.txt");
                then.status(500).body("boom");
            })
            .await;
        let err = retriever_for(&server)
            .fetch("o", "r", 5, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn deadline_is_reported_as_timeout() {
        let server = MockServer::start_async().await;
        mock_log(&server, 3, b"slow".to_vec(), Some(Duration::from_secs(3))).await;
        let retriever = retriever_for(&server).with_deadline(Duration::from_millis(150));
        let session = LogSession::new(Arc::new(retriever));
        let outcome = session.start("o", "r", 3).wait().await;
        assert_eq!(
            outcome,
            Some(LogOutcome::Failed {
                job_id: 3,
                message: TIMED_OUT.to_string()
            })
        );
    }

    #[tokio::test]
    async fn newer_fetch_supersedes_older() {
        let server = MockServer::start_async().await;
        mock_log(&server, 1, b"old".to_vec(), Some(Duration::from_secs(2))).await;
        mock_log(&server, 2, b"new".to_vec(), None).await;
        let session = LogSession::new(Arc::new(retriever_for(&server)));

        let first = session.start("o", "r", 1);
        let second = session.start("o", "r", 2);
        assert!(!session.is_current(first.generation));
        assert!(session.is_current(second.generation));

        assert_eq!(first.wait().await, None);
        assert_eq!(
            second.wait().await,
            Some(LogOutcome::Loaded {
                job_id: 2,
                text: "new".into(),
                truncated: false
            })
        );
    }

    #[tokio::test]
    async fn cancelled_fetch_is_silent() {
        let server = MockServer::start_async().await;
        mock_log(&server, 4, b"late".to_vec(), Some(Duration::from_secs(2))).await;
        let session = LogSession::new(Arc::new(retriever_for(&server)));
        let pending = session.start("o", "r", 4);
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.cancel();
        assert_eq!(pending.wait().await, None);
    }

    #[tokio::test]
    async fn cancel_retires_the_generation() {
        let server = MockServer::start_async().await;
        mock_log(&server, 8, b"later".to_vec(), Some(Duration::from_secs(2))).await;
        let session = LogSession::new(Arc::new(retriever_for(&server)));
        let pending = session.start("o", "r", 8);
        assert!(session.is_current(pending.generation));
        session.cancel();
        assert!(!session.is_current(pending.generation));
        assert_eq!(pending.wait().await, None);
    }

    #[tokio::test]
    async fn cancel_during_error_body_is_cancelled() {
        let failed = http::Response::builder()
            .status(500)
            .body("upstream exploded")
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = error_from_response(Response::from(failed), &cancel).await;
        assert!(err.is_cancelled(), "got {err}");

        let failed = http::Response::builder()
            .status(500)
            .body("upstream exploded")
            .unwrap();
        let err = error_from_response(Response::from(failed), &CancellationToken::new()).await;
        assert!(err.to_string().contains("HTTP 500"));
        assert!(err.to_string().contains("upstream exploded"));
    }

    #[tokio::test]
    async fn direct_log_body_returns_its_permit() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/o/r/actions/jobs/11/logs");
                then.status(200).body("inline log\n");
            })
            .await;
        let retriever = retriever_for(&server);
        let log = retriever
            .fetch("o", "r", 11, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(log.text, "inline log\n");
        assert_eq!(retriever.client.gate().in_flight(), 0);
    }

    #[tokio::test]
    async fn truncated_log_gets_notice() {
        let server = MockServer::start_async().await;
        mock_log(&server, 6, vec![b'b'; 64], None).await;
        let session = LogSession::new(Arc::new(retriever_for(&server).with_max_bytes(32)));
        match session.start("o", "r", 6).wait().await {
            Some(LogOutcome::Loaded { text, truncated, .. }) => {
                assert!(truncated);
                assert!(text.starts_with(&"b".repeat(32)));
                assert!(text.ends_with(TRUNCATED_NOTICE));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
