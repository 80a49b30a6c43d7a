//! The forwarding pipeline: queue, batch, sign, POST, retry.
//!
//! A single worker thread drains an in-memory queue, posting batches to the
//! server in FIFO order and backing off after failures. The queue is
//! mirrored to an on-disk backing file (written atomically via a temp file
//! and rename) so samples survive a crash or restart. Producers only append
//! under the lock and signal; the worker alone touches the network and the
//! backing file.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{CollectorConfig, CollectorError};
use crate::sample::{join_samples, report_signature, Sample};

/// Forwards samples to the server, at least once and in order.
pub struct Reporter {
    report_url: String,
    report_secret: String,
    batch_size: usize,
    timeout: Duration,
    retry_delay: Duration,
    backing_path: Option<PathBuf>,

    state: Mutex<ReporterState>,
    cond: Condvar,

    retry_tx: SyncSender<()>,
    retry_rx: Mutex<Option<Receiver<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct ReporterState {
    /// Samples not yet accepted by the server, oldest first.
    queued: Vec<Sample>,
    /// What the backing file currently holds, so unchanged queues are not
    /// rewritten.
    backing: Vec<Sample>,
    stopping: bool,
}

impl Reporter {
    /// Creates a reporter, loading any samples a previous process left in
    /// the backing file.
    pub fn new(cfg: &CollectorConfig) -> Result<Self, CollectorError> {
        let backing_path =
            (!cfg.backing_file.is_empty()).then(|| PathBuf::from(&cfg.backing_file));

        let mut loaded = Vec::new();
        if let Some(path) = &backing_path {
            if path.exists() {
                loaded = read_backing_file(path)?;
                if !loaded.is_empty() {
                    tracing::info!(
                        "loaded {} queued sample(s) from {}",
                        loaded.len(),
                        path.display()
                    );
                }
            }
        }

        // Buffered so a pulse is never lost when the worker isn't waiting.
        let (retry_tx, retry_rx) = sync_channel(2);

        Ok(Self {
            report_url: cfg.report_url.clone(),
            report_secret: cfg.report_secret.clone(),
            batch_size: cfg.report_batch_size.max(1),
            timeout: Duration::from_millis(cfg.report_timeout_ms),
            retry_delay: Duration::from_millis(cfg.report_retry_ms),
            backing_path,
            state: Mutex::new(ReporterState {
                queued: loaded.clone(),
                backing: loaded,
                stopping: false,
            }),
            cond: Condvar::new(),
            retry_tx,
            retry_rx: Mutex::new(Some(retry_rx)),
            worker: Mutex::new(None),
        })
    }

    /// Starts the worker thread.
    pub fn start(self: std::sync::Arc<Self>) {
        let Some(retry_rx) = self.retry_rx.lock().unwrap().take() else {
            return;
        };
        let reporter = self.clone();
        let handle = std::thread::spawn(move || reporter.process_samples(retry_rx));
        *self.worker.lock().unwrap() = Some(handle);
    }

    /// Stops the worker, waiting for it to flush the queue to the backing
    /// file and exit.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.stopping = true;
        }
        self.cond.notify_one();
        let _ = self.retry_tx.try_send(());
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Queues one sample for delivery. Non-blocking.
    pub fn report_sample(&self, sample: Sample) {
        tracing::debug!("queuing {}", sample.to_line());
        {
            let mut state = self.state.lock().unwrap();
            state.queued.push(sample);
        }
        self.cond.notify_one();
    }

    /// Queues samples for delivery. Non-blocking.
    pub fn report_samples(&self, samples: Vec<Sample>) {
        tracing::debug!("queuing {} sample(s)", samples.len());
        {
            let mut state = self.state.lock().unwrap();
            state.queued.extend(samples);
        }
        self.cond.notify_one();
    }

    /// Cuts short the current retry backoff. Test hook.
    pub fn trigger_retry_timeout(&self) {
        let _ = self.retry_tx.try_send(());
    }

    fn process_samples(&self, retry_rx: Receiver<()>) {
        let client = match reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("failed to build HTTP client: {e}");
                return;
            }
        };

        loop {
            let samples = {
                let mut state = self.state.lock().unwrap();
                while state.queued.is_empty() && !state.stopping {
                    state = self.cond.wait(state).unwrap();
                }
                if state.stopping {
                    tracing::info!("reporter loop exiting");
                    let queued = state.queued.clone();
                    let dirty = self.backing_path.is_some() && queued != state.backing;
                    drop(state);
                    if dirty {
                        if let Err(e) = self.write_backing_file(&queued) {
                            tracing::error!("failed writing backing file: {e}");
                        }
                    }
                    return;
                }
                std::mem::take(&mut state.queued)
            };

            tracing::debug!("took {} sample(s) from queue", samples.len());

            let mut got_error = false;
            let mut remaining: &[Sample] = &samples;
            while !remaining.is_empty() {
                let n = remaining.len().min(self.batch_size);
                match self.send_samples(&client, &remaining[..n]) {
                    Ok(()) => {
                        tracing::debug!("reported {} sample(s)", n);
                        remaining = &remaining[n..];
                    }
                    Err(e) => {
                        tracing::warn!("got error when reporting samples: {e}");
                        got_error = true;
                        break;
                    }
                }
            }

            let (snapshot, dirty) = {
                let mut state = self.state.lock().unwrap();
                if got_error {
                    // Unsent samples go back to the front so ordering holds.
                    tracing::debug!("returning {} unreported sample(s) to queue", remaining.len());
                    let mut requeued = remaining.to_vec();
                    requeued.append(&mut state.queued);
                    state.queued = requeued;
                }
                let dirty = self.backing_path.is_some() && state.queued != state.backing;
                (state.queued.clone(), dirty)
            };
            if dirty {
                match self.write_backing_file(&snapshot) {
                    Ok(()) => self.state.lock().unwrap().backing = snapshot,
                    Err(e) => tracing::error!("failed writing backing file: {e}"),
                }
            }

            if got_error {
                tracing::debug!("sleeping {} ms after failure", self.retry_delay.as_millis());
                let _ = retry_rx.recv_timeout(self.retry_delay);
            }
        }
    }

    fn send_samples(&self, client: &reqwest::blocking::Client, samples: &[Sample]) -> Result<(), String> {
        let payload = join_samples(samples);
        let signature = report_signature(&payload, &self.report_secret);
        let response = client
            .post(&self.report_url)
            .form(&[("d", payload.as_str()), ("s", signature.as_str())])
            .send()
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("got {}", response.status()));
        }
        Ok(())
    }

    /// Atomically replaces the backing file with the given samples, one JSON
    /// record per line.
    fn write_backing_file(&self, samples: &[Sample]) -> Result<(), CollectorError> {
        let Some(path) = &self.backing_path else {
            return Ok(());
        };
        let mut temp_os = path.as_os_str().to_owned();
        temp_os.push(".new");
        let temp_path = PathBuf::from(temp_os);
        {
            let file = fs::File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            for sample in samples {
                serde_json::to_writer(&mut writer, sample)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_backing_file(path: &Path) -> Result<Vec<Sample>, CollectorError> {
    let contents = fs::read_to_string(path)?;
    let mut samples = Vec::new();
    for line in contents.lines() {
        if line.is_empty() {
            continue;
        }
        samples.push(serde_json::from_str(line)?);
    }
    Ok(samples)
}
