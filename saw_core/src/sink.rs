//! Downstream consumers of cycle records.
//!
//! Each sink runs on its own worker thread behind a bounded queue. The
//! control loop only ever calls `try_send`: a full queue drops the record
//! and bumps a counter, so a slow disk or a stalled consumer can never hold
//! up actuation. A failing sink logs and drops the record.
//!
//! Each `SinkWorker` owns exactly one thread, joined when the worker is
//! dropped.
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel as xch;
use eyre::WrapErr;
use serde::Serialize;

use crate::control::CycleRecord;
use crate::error::Result;

pub trait RecordSink {
    fn accept(&mut self, record: &CycleRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

// ── CSV persistence ──────────────────────────────────────────────────────────

/// One CSV row per cycle, appended to a file. A header is written when the
/// file is new or empty.
pub struct CsvRowStore {
    writer: csv::Writer<File>,
}

impl CsvRowStore {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .wrap_err_with(|| format!("open persistence CSV {}", path.display()))?;
        let fresh = file.metadata().map(|m| m.len() == 0).unwrap_or(true);
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if fresh {
            writer.write_record(CycleRecord::csv_header())?;
            writer.flush()?;
        }
        Ok(Self { writer })
    }
}

impl RecordSink for CsvRowStore {
    fn accept(&mut self, record: &CycleRecord) -> Result<()> {
        self.writer.write_record(record.csv_fields())?;
        self.writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

// ── JSON-lines telemetry ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct Envelope<'a> {
    ts: u64,
    values: &'a CycleRecord,
}

/// Telemetry envelope `{"ts": <ms>, "values": {...}}`, one per line.
pub struct JsonLinesPublisher<W: Write> {
    out: W,
}

impl JsonLinesPublisher<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .wrap_err_with(|| format!("open telemetry file {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> JsonLinesPublisher<W> {
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for JsonLinesPublisher<W> {
    fn accept(&mut self, record: &CycleRecord) -> Result<()> {
        let env = Envelope {
            ts: record.reading.timestamp_ms,
            values: record,
        };
        serde_json::to_writer(&mut self.out, &env)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

// ── Recent history ───────────────────────────────────────────────────────────

/// Bounded ring of the latest records for presentation. Readers take
/// snapshots; the oldest record is evicted on overflow.
#[derive(Debug, Clone)]
pub struct RecentHistory {
    inner: Arc<Mutex<VecDeque<CycleRecord>>>,
    cap: usize,
}

impl RecentHistory {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(cap))),
            cap,
        }
    }

    pub fn push(&self, record: CycleRecord) {
        let mut q = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if q.len() == self.cap {
            q.pop_front();
        }
        q.push_back(record);
    }

    pub fn snapshot(&self) -> Vec<CycleRecord> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        self.cap
    }
}

// ── Worker ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// A sink running on its own thread behind a bounded queue.
pub struct SinkWorker {
    name: String,
    tx: Option<xch::Sender<CycleRecord>>,
    counters: Arc<Counters>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl SinkWorker {
    pub fn spawn<S: RecordSink + Send + 'static>(name: &str, mut sink: S, capacity: usize) -> Self {
        let (tx, rx) = xch::bounded::<CycleRecord>(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let thread_counters = Arc::clone(&counters);
        let thread_name = name.to_string();

        let join_handle = std::thread::spawn(move || {
            // Ends once every sender is dropped and the queue is drained.
            for record in rx.iter() {
                match sink.accept(&record) {
                    Ok(()) => {
                        thread_counters.accepted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        thread_counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(sink = %thread_name, error = %e, "sink write failed; record dropped");
                    }
                }
            }
            if let Err(e) = sink.flush() {
                tracing::warn!(sink = %thread_name, error = %e, "sink flush failed");
            }
            tracing::trace!(sink = %thread_name, "sink thread exiting cleanly");
        });

        Self {
            name: name.to_string(),
            tx: Some(tx),
            counters,
            join_handle: Some(join_handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a record without blocking. Returns false if it was dropped.
    pub fn try_send(&self, record: &CycleRecord) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(record.clone()) {
            Ok(()) => true,
            Err(xch::TrySendError::Full(_) | xch::TrySendError::Disconnected(_)) => {
                let n = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if n.is_power_of_two() {
                    tracing::warn!(sink = %self.name, dropped = n, "sink queue full; dropping records");
                }
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn accepted(&self) -> u64 {
        self.counters.accepted.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }
}

impl Drop for SinkWorker {
    fn drop(&mut self) {
        // Closing the queue lets the thread drain what is left and exit.
        drop(self.tx.take());
        if let Some(handle) = self.join_handle.take() {
            if let Err(e) = handle.join() {
                tracing::warn!(sink = %self.name, ?e, "sink thread panicked during shutdown");
            }
        }
    }
}

// ── Fan-out ──────────────────────────────────────────────────────────────────

/// Every configured sink plus the presentation history.
#[derive(Default)]
pub struct SinkSet {
    workers: Vec<SinkWorker>,
    history: Option<RecentHistory>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the file sinks named in `cfg`. Relative paths resolve against
    /// `base_dir` when given.
    pub fn from_config(cfg: &saw_config::SinksCfg, base_dir: Option<&Path>) -> Result<Self> {
        let resolve = |p: &str| match base_dir {
            Some(dir) if Path::new(p).is_relative() => dir.join(p),
            _ => Path::new(p).to_path_buf(),
        };
        let mut set = Self::new().with_history(RecentHistory::new(cfg.history_len));
        if let Some(p) = &cfg.persist_csv {
            let path = resolve(p);
            set = set.with_worker(SinkWorker::spawn(
                "persist",
                CsvRowStore::open(&path)?,
                cfg.queue_capacity,
            ));
            tracing::info!(path = %path.display(), "persistence sink opened");
        }
        if let Some(p) = &cfg.telemetry_jsonl {
            let path = resolve(p);
            set = set.with_worker(SinkWorker::spawn(
                "telemetry",
                JsonLinesPublisher::create(&path)?,
                cfg.queue_capacity,
            ));
            tracing::info!(path = %path.display(), "telemetry sink opened");
        }
        Ok(set)
    }

    #[must_use]
    pub fn with_worker(mut self, worker: SinkWorker) -> Self {
        self.workers.push(worker);
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: RecentHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub const fn history(&self) -> Option<&RecentHistory> {
        self.history.as_ref()
    }

    pub fn workers(&self) -> &[SinkWorker] {
        &self.workers
    }

    pub fn dispatch(&self, record: &CycleRecord) {
        for w in &self.workers {
            w.try_send(record);
        }
        if let Some(h) = &self.history {
            h.push(record.clone());
        }
    }

    pub fn dropped(&self) -> u64 {
        self.workers.iter().map(SinkWorker::dropped).sum()
    }
}
