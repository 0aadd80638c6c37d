//! Origin transfers.
//!
//! All network work funnels through a [`Session`]: a fixed-width transfer
//! pool with priority ordering, a per-task callback registry for progress and
//! completion routing, and the catalog/package download flows built on top of
//! it.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

use crate::config::{Layout, CATALOG_DATABASE, PACKAGE_DATABASE};
use crate::domain::InstallPriority;
use crate::error::{ContentError, Result};
use crate::events::{ContentEvent, EventBus};

use super::extract;

/// Width of the transfer pool. Transfers beyond this wait in the queue.
pub const MAX_CONCURRENT_TRANSFERS: usize = 5;

pub type TaskId = u64;

/// Fractional progress callback, invoked with values in `0.0..=1.0`
pub type ProgressFn = Box<dyn Fn(f32) + Send + Sync>;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A queued transfer job: higher priority first, then submission order
struct QueuedJob {
    priority: InstallPriority,
    seq: u64,
    job: Job,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct SchedulerState {
    queue: BinaryHeap<QueuedJob>,
    /// Sequence numbers of jobs queued or running
    outstanding: BTreeSet<u64>,
    running: usize,
    next_seq: u64,
    /// Waiters released once every job with `seq < threshold` has finished
    barriers: Vec<(u64, oneshot::Sender<()>)>,
}

/// Fixed-width priority scheduler for transfer jobs
struct Scheduler {
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SchedulerState {
                queue: BinaryHeap::new(),
                outstanding: BTreeSet::new(),
                running: 0,
                next_seq: 0,
                barriers: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn enqueue(self: &Arc<Self>, priority: InstallPriority, job: Job) {
        {
            let mut state = self.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.outstanding.insert(seq);
            state.queue.push(QueuedJob { priority, seq, job });
        }
        self.pump();
    }

    /// Spawn queued jobs until the pool is full or the queue is empty
    fn pump(self: &Arc<Self>) {
        loop {
            let entry = {
                let mut state = self.lock();
                if state.running >= MAX_CONCURRENT_TRANSFERS {
                    return;
                }
                match state.queue.pop() {
                    Some(entry) => {
                        state.running += 1;
                        entry
                    }
                    None => return,
                }
            };
            let QueuedJob { seq, job, .. } = entry;
            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                job.await;
                scheduler.complete(seq);
            });
        }
    }

    fn complete(self: &Arc<Self>, seq: u64) {
        let fired = {
            let mut state = self.lock();
            state.running -= 1;
            state.outstanding.remove(&seq);
            let oldest = state.outstanding.iter().next().copied();

            let mut fired = Vec::new();
            for (threshold, waiter) in std::mem::take(&mut state.barriers) {
                if oldest.map_or(true, |o| o >= threshold) {
                    fired.push(waiter);
                } else {
                    state.barriers.push((threshold, waiter));
                }
            }
            fired
        };
        for waiter in fired {
            let _ = waiter.send(());
        }
        self.pump();
    }

    /// Wait until every job queued before this call has finished. Jobs queued
    /// afterwards do not delay the wait.
    async fn wait_idle(&self) {
        let waiter = {
            let mut state = self.lock();
            let threshold = state.next_seq;
            if state.outstanding.iter().next().map_or(true, |&o| o >= threshold) {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.barriers.push((threshold, tx));
                Some(rx)
            }
        };
        if let Some(rx) = waiter {
            let _ = rx.await;
        }
    }
}

/// Progress and completion routed back to the waiting caller by task id
enum TransferSignal {
    Progress(TaskId, f32),
    Finished(TaskId, Result<()>),
}

struct TaskCallbacks {
    progress: ProgressFn,
    completion: oneshot::Sender<Result<()>>,
}

type CallbackRegistry = Arc<Mutex<HashMap<TaskId, TaskCallbacks>>>;

fn lock_registry(registry: &Mutex<HashMap<TaskId, TaskCallbacks>>) -> MutexGuard<'_, HashMap<TaskId, TaskCallbacks>> {
    registry.lock().unwrap_or_else(|err| err.into_inner())
}

/// Outcome of a catalog fetch for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFetchOutcome {
    /// The origin's latest version was already on disk; no download happened
    AlreadyCurrent { version: i64 },
    Downloaded { version: i64 },
}

impl CatalogFetchOutcome {
    pub fn version(&self) -> i64 {
        match *self {
            CatalogFetchOutcome::AlreadyCurrent { version } => version,
            CatalogFetchOutcome::Downloaded { version } => version,
        }
    }
}

/// An extracted item package sitting in the staging area.
///
/// Dropping it discards the staged files; the installer moves the payload
/// directory out before dropping.
pub struct StagedPackage {
    _scratch: tempfile::TempDir,
    directory: PathBuf,
}

impl StagedPackage {
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[derive(Deserialize)]
struct CatalogIndex {
    #[serde(rename = "catalogVersion")]
    catalog_version: i64,
}

/// Shared transfer session over one HTTP client.
///
/// Must be created inside a tokio runtime: construction spawns the signal
/// demultiplexing task that routes progress and completion to callers.
pub struct Session {
    client: reqwest::Client,
    scheduler: Arc<Scheduler>,
    registry: CallbackRegistry,
    signals: mpsc::UnboundedSender<TransferSignal>,
    next_task_id: AtomicU64,
    bus: EventBus,
}

impl Session {
    pub fn new(bus: EventBus) -> Arc<Self> {
        let (signals, mut receiver) = mpsc::unbounded_channel();
        let registry: CallbackRegistry = Arc::default();

        let demux = Arc::clone(&registry);
        tokio::spawn(async move {
            while let Some(signal) = receiver.recv().await {
                match signal {
                    TransferSignal::Progress(task_id, fraction) => {
                        if let Some(callbacks) = lock_registry(&demux).get(&task_id) {
                            (callbacks.progress)(fraction);
                        }
                    }
                    TransferSignal::Finished(task_id, result) => {
                        match lock_registry(&demux).remove(&task_id) {
                            Some(callbacks) => {
                                let _ = callbacks.completion.send(result);
                            }
                            None => warn!(task_id, "completion for unknown transfer"),
                        }
                    }
                }
            }
        });

        Arc::new(Self {
            client: reqwest::Client::new(),
            scheduler: Scheduler::new(),
            registry,
            signals,
            next_task_id: AtomicU64::new(1),
            bus,
        })
    }

    /// True when no transfers are queued or running
    pub fn is_idle(&self) -> bool {
        self.scheduler.lock().outstanding.is_empty()
    }

    /// Wait for every transfer queued before this call to finish
    pub async fn wait_for_all(&self) {
        self.scheduler.wait_idle().await;
    }

    /// Ask the origin for its latest catalog version
    pub async fn fetch_catalog_version(&self, base_url: &str) -> Result<i64> {
        let url = index_url(base_url);
        let client = self.client.clone();
        let bus = self.bus.clone();
        self.run_scheduled(InstallPriority::Default, async move {
            bus.publish(ContentEvent::TransferStarted);
            let result = fetch_index(&client, &url).await;
            bus.publish(ContentEvent::TransferFinished);
            result
        })
        .await
    }

    /// Bring one source's catalog up to the origin's latest version.
    ///
    /// Fetches the version first; if the version-keyed database already
    /// exists on disk the download is skipped entirely. Otherwise the archive
    /// is streamed to staging, unpacked, and the database renamed into place.
    #[instrument(skip(self, layout, progress))]
    pub async fn download_catalog(
        &self,
        base_url: &str,
        source_name: &str,
        layout: &Layout,
        progress: ProgressFn,
    ) -> Result<CatalogFetchOutcome> {
        let version = self.fetch_catalog_version(base_url).await?;
        let destination = layout.catalog_database(source_name, version);
        if destination.is_file() {
            debug!(version, "catalog already current");
            return Ok(CatalogFetchOutcome::AlreadyCurrent { version });
        }

        tokio::fs::create_dir_all(layout.staging_directory()).await?;
        let scratch = tempfile::tempdir_in(layout.staging_directory())?;
        let archive = scratch.path().join("catalog.zip");

        self.download(
            InstallPriority::Default,
            catalog_url(base_url, version),
            archive.clone(),
            progress,
        )
        .await?;

        let database =
            extract::unpack_archive_expecting(archive, scratch.path().join("extracted"), CATALOG_DATABASE)
                .await?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&database, &destination).await?;
        debug!(version, "catalog downloaded");
        Ok(CatalogFetchOutcome::Downloaded { version })
    }

    /// Download and unpack one item package archive into staging
    #[instrument(skip(self, layout, progress))]
    pub async fn download_item_package(
        &self,
        base_url: &str,
        external_id: &str,
        version: i64,
        priority: InstallPriority,
        layout: &Layout,
        progress: ProgressFn,
    ) -> Result<StagedPackage> {
        tokio::fs::create_dir_all(layout.staging_directory()).await?;
        let scratch = tempfile::tempdir_in(layout.staging_directory())?;
        let archive = scratch.path().join("package.zip");

        self.download(
            priority,
            item_package_url(base_url, external_id, version),
            archive.clone(),
            progress,
        )
        .await?;

        let directory = scratch.path().join("extracted");
        extract::unpack_archive_expecting(archive, directory.clone(), PACKAGE_DATABASE).await?;
        Ok(StagedPackage {
            _scratch: scratch,
            directory,
        })
    }

    /// Stream one archive to disk through the transfer pool, routing progress
    /// and completion through the registry.
    async fn download(
        &self,
        priority: InstallPriority,
        url: String,
        destination: PathBuf,
        progress: ProgressFn,
    ) -> Result<()> {
        let task_id = self
            .next_task_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let (completion, done) = oneshot::channel();
        lock_registry(&self.registry).insert(
            task_id,
            TaskCallbacks {
                progress,
                completion,
            },
        );

        let client = self.client.clone();
        let signals = self.signals.clone();
        let bus = self.bus.clone();
        self.run_scheduled(priority, async move {
            bus.publish(ContentEvent::TransferStarted);
            let result = stream_to_file(&client, &url, &destination, task_id, &signals).await;
            bus.publish(ContentEvent::TransferFinished);
            let _ = signals.send(TransferSignal::Finished(task_id, result));
            Ok(())
        })
        .await?;

        match done.await {
            Ok(result) => result,
            Err(_) => Err(interrupted("transfer completion dropped")),
        }
    }

    /// Run a future as a pool job and hand its result back to the caller
    async fn run_scheduled<T, F>(&self, priority: InstallPriority, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.scheduler.enqueue(
            priority,
            Box::pin(async move {
                let _ = tx.send(job.await);
            }),
        );
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(interrupted("transfer task dropped")),
        }
    }
}

fn interrupted(message: &str) -> ContentError {
    ContentError::Io(std::io::Error::new(
        std::io::ErrorKind::Interrupted,
        message.to_string(),
    ))
}

fn index_url(base_url: &str) -> String {
    format!("{}/v3/index.json", base_url.trim_end_matches('/'))
}

fn catalog_url(base_url: &str, version: i64) -> String {
    format!("{}/v3/catalogs/{}.zip", base_url.trim_end_matches('/'), version)
}

fn item_package_url(base_url: &str, external_id: &str, version: i64) -> String {
    format!(
        "{}/v3/item-packages/{}/{}.zip",
        base_url.trim_end_matches('/'),
        external_id,
        version
    )
}

async fn fetch_index(client: &reqwest::Client, url: &str) -> Result<i64> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(ContentError::Transport {
            status: response.status(),
            url: url.to_string(),
        });
    }
    let index: CatalogIndex = response
        .json()
        .await
        .map_err(|err| ContentError::MalformedResponse(err.to_string()))?;
    Ok(index.catalog_version)
}

async fn stream_to_file(
    client: &reqwest::Client,
    url: &str,
    destination: &Path,
    task_id: TaskId,
    signals: &mpsc::UnboundedSender<TransferSignal>,
) -> Result<()> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(ContentError::Transport {
            status: response.status(),
            url: url.to_string(),
        });
    }

    let total = response.content_length().unwrap_or(0);
    let mut file = tokio::fs::File::create(destination).await?;
    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;
        if total > 0 {
            let _ = signals.send(TransferSignal::Progress(task_id, received as f32 / total as f32));
        }
    }
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_job(scheduler: &Arc<Scheduler>, priority: InstallPriority, order: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) {
        let order = Arc::clone(order);
        scheduler.enqueue(
            priority,
            Box::pin(async move {
                order.lock().unwrap().push(label);
            }),
        );
    }

    #[tokio::test]
    async fn test_high_priority_overtakes_queued_transfers() {
        let scheduler = Scheduler::new();
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        // Fill every pool slot with a job blocked on the gate
        for _ in 0..MAX_CONCURRENT_TRANSFERS {
            let gate = Arc::clone(&gate);
            scheduler.enqueue(
                InstallPriority::Default,
                Box::pin(async move {
                    let _permit = gate.acquire().await;
                }),
            );
        }

        push_job(&scheduler, InstallPriority::Default, &order, "first-default");
        push_job(&scheduler, InstallPriority::Default, &order, "second-default");
        push_job(&scheduler, InstallPriority::High, &order, "high");

        gate.add_permits(MAX_CONCURRENT_TRANSFERS);
        scheduler.wait_idle().await;

        assert_eq!(
            *order.lock().unwrap(),
            vec!["high", "first-default", "second-default"]
        );
    }

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_when_empty() {
        let scheduler = Scheduler::new();
        scheduler.wait_idle().await;
    }

    #[tokio::test]
    async fn test_wait_idle_waits_for_prior_jobs() {
        let scheduler = Scheduler::new();
        let done = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&done);
        scheduler.enqueue(
            InstallPriority::Default,
            Box::pin(async move {
                tokio::task::yield_now().await;
                *flag.lock().unwrap() = true;
            }),
        );
        scheduler.wait_idle().await;
        assert!(*done.lock().unwrap());
    }

    #[test]
    fn test_url_builders_trim_trailing_slash() {
        assert_eq!(index_url("http://o/"), "http://o/v3/index.json");
        assert_eq!(catalog_url("http://o", 6), "http://o/v3/catalogs/6.zip");
        assert_eq!(
            item_package_url("http://o", "item-7", 11),
            "http://o/v3/item-packages/item-7/11.zip"
        );
    }
}
