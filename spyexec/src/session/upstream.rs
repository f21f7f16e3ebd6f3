//! Remote upstream: delivers profiles to the collector's ingest endpoint
//!
//! Uploads are queued on a bounded channel and sent by a fixed pool of
//! worker threads, each with its own blocking HTTP client. Stopping closes
//! the queue, lets the workers drain what is left, then joins them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;

use super::profile::UploadJob;
use crate::domain::UploadError;

/// Maximum number of profiles waiting for a worker
const QUEUE_CAPACITY: usize = 100;

/// Destination for finished profile windows.
pub trait Upstream: Send + Sync {
    /// Queue a profile for delivery. Never blocks the caller.
    fn upload(&self, job: UploadJob);

    /// Flush queued profiles and release the connection pool. Idempotent.
    fn stop(&self);
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub server_address: String,
    pub auth_token: Option<String>,
    pub threads: usize,
    pub request_timeout: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    uploaded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of delivery outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadStats {
    pub uploaded: u64,
    pub failed: u64,
    pub dropped: u64,
}

pub struct RemoteUpstream {
    queue: Mutex<Option<Sender<UploadJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl RemoteUpstream {
    /// Validate the collector address and start the worker pool.
    ///
    /// # Errors
    /// - [`UploadError::InvalidAddress`] for a malformed or non-HTTP address
    /// - [`UploadError::Worker`] if a worker thread cannot be started
    pub fn new(config: RemoteConfig) -> Result<Self, UploadError> {
        let ingest_url = ingest_url(&config.server_address)?;
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        let counters = Arc::new(Counters::default());

        let threads = config.threads.max(1);
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let worker = Worker {
                rx: rx.clone(),
                url: ingest_url.clone(),
                auth_token: config.auth_token.clone(),
                request_timeout: config.request_timeout,
                counters: Arc::clone(&counters),
            };
            let handle =
                std::thread::Builder::new().name(format!("upstream-{i}")).spawn(move || worker.run())?;
            workers.push(handle);
        }
        info!("uploading to {ingest_url} with {threads} worker(s)");

        Ok(Self { queue: Mutex::new(Some(tx)), workers: Mutex::new(workers), counters })
    }

    #[must_use]
    pub fn stats(&self) -> UploadStats {
        UploadStats {
            uploaded: self.counters.uploaded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Upstream for RemoteUpstream {
    fn upload(&self, job: UploadJob) {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = queue.as_ref() else {
            warn!("upstream is stopped, dropping profile for {}", job.name);
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                warn!("{}, dropping profile for {}", UploadError::QueueFull, job.name);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(job)) => {
                warn!("{}, dropping profile for {}", UploadError::Closed, job.name);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn stop(&self) {
        // Dropping the only sender lets workers finish the backlog and exit
        let Some(tx) = self.queue.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        drop(tx);

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in workers {
            if handle.join().is_err() {
                error!("upload worker panicked");
            }
        }
        let stats = self.stats();
        info!(
            "upstream stopped: {} uploaded, {} failed, {} dropped",
            stats.uploaded, stats.failed, stats.dropped
        );
    }
}

impl Drop for RemoteUpstream {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    rx: Receiver<UploadJob>,
    url: Url,
    auth_token: Option<String>,
    request_timeout: Duration,
    counters: Arc<Counters>,
}

impl Worker {
    fn run(self) {
        let client = match Client::builder().timeout(self.request_timeout).build() {
            Ok(client) => client,
            Err(e) => {
                error!("failed to build HTTP client: {e}");
                return;
            }
        };

        for job in &self.rx {
            match self.send(&client, &job) {
                Ok(()) => {
                    self.counters.uploaded.fetch_add(1, Ordering::Relaxed);
                    debug!("uploaded {} stacks for {}", job.profile.len(), job.name);
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!("upload for {} failed: {e}", job.name);
                }
            }
        }
    }

    fn send(&self, client: &Client, job: &UploadJob) -> Result<(), UploadError> {
        let from = unix_seconds(job.from).to_string();
        let until = unix_seconds(job.until).to_string();
        let sample_rate = job.sample_rate.to_string();

        let mut request = client
            .post(self.url.clone())
            .query(&[
                ("name", job.name.as_str()),
                ("from", from.as_str()),
                ("until", until.as_str()),
                ("spyName", job.spy_name.as_str()),
                ("sampleRate", sample_rate.as_str()),
                ("format", "folded"),
            ])
            .header(CONTENT_TYPE, "binary/octet-stream")
            .body(job.profile.to_folded());
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send()?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(UploadError::Status { status: status.as_u16(), body: response.text().unwrap_or_default() })
        }
    }
}

fn ingest_url(server_address: &str) -> Result<Url, UploadError> {
    let invalid = || UploadError::InvalidAddress(server_address.to_string());
    if !(server_address.starts_with("http://") || server_address.starts_with("https://")) {
        return Err(invalid());
    }
    Url::parse(&format!("{}/ingest", server_address.trim_end_matches('/'))).map_err(|_| invalid())
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Profile;

    fn config(address: &str) -> RemoteConfig {
        RemoteConfig {
            server_address: address.to_string(),
            auth_token: None,
            threads: 2,
            request_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_ingest_url() {
        assert_eq!(ingest_url("http://localhost:4040").unwrap().as_str(), "http://localhost:4040/ingest");
        assert_eq!(ingest_url("https://collector/").unwrap().as_str(), "https://collector/ingest");
        assert!(matches!(ingest_url("localhost:4040"), Err(UploadError::InvalidAddress(_))));
    }

    #[test]
    fn test_stop_is_idempotent_and_rejects_later_uploads() {
        let upstream = RemoteUpstream::new(config("http://127.0.0.1:9")).unwrap();
        upstream.stop();
        upstream.stop();

        upstream.upload(UploadJob {
            name: "app.cpu".to_string(),
            spy_name: "pyspy".to_string(),
            sample_rate: 100,
            from: SystemTime::now(),
            until: SystemTime::now(),
            profile: Profile::new(),
        });
        assert_eq!(upstream.stats().dropped, 1);
    }
}
