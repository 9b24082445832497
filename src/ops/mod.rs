//! Operation Manager (C6, spec §4.6): tracks long-running jobs with
//! priority scheduling, rate-limited progress, and cooperative
//! cancel/pause — independent of what each operation body actually does.
//!
//! Grounded on `download_manager.rs`'s `active_downloads:
//! Arc<RwLock<HashMap<Uuid, broadcast::Sender<()>>>>` cancel-signal idiom
//! (here: one `Arc<AtomicBool>` per live operation) and its
//! spawn-the-task/update-on-completion shape; the concurrent registry
//! follows `cache.rs`'s `dashmap` precedent rather than a
//! `Mutex<HashMap>`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};

use crate::error::{CoreError, CoreResult};
use crate::models::OperationId;

/// Default rate limit for progress broadcasts (spec §4.6: "0.5-2 s").
const NOTIFICATION_INTERVAL: Duration = Duration::from_millis(1000);
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Operation type tags (spec §4.6); each corresponds to an entry point the
/// caller's operation body implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ProcessVideos,
    AnalyzeVideos,
    RegenerateThumbnails,
    PopulateThumbnails,
    CleanThumbnails,
    PopulateDatabase,
    OptimizeDatabase,
    ClearDatabase,
    BackupDatabase,
    AnalyzeCharacters,
    CleanFalsePositives,
    VerifyIntegrity,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::ProcessVideos => "process_videos",
            OperationKind::AnalyzeVideos => "analyze_videos",
            OperationKind::RegenerateThumbnails => "regenerate_thumbnails",
            OperationKind::PopulateThumbnails => "populate_thumbnails",
            OperationKind::CleanThumbnails => "clean_thumbnails",
            OperationKind::PopulateDatabase => "populate_database",
            OperationKind::OptimizeDatabase => "optimize_database",
            OperationKind::ClearDatabase => "clear_database",
            OperationKind::BackupDatabase => "backup_database",
            OperationKind::AnalyzeCharacters => "analyze_characters",
            OperationKind::CleanFalsePositives => "clean_false_positives",
            OperationKind::VerifyIntegrity => "verify_integrity",
        }
    }
}

/// Scheduling priority. Declaration order doubles as `Ord`: `Critical` is
/// greatest, so a max-heap `BinaryHeap<QueueEntry>` pops it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Failed | OperationState::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub priority: Priority,
    pub state: OperationState,
    pub total_items: Option<u64>,
    pub processed_count: u64,
    pub progress_percent: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_progress_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<Value>,
}

/// Snapshot delivered to a progress subscriber (spec §4.7's
/// `operation_progress` frame payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationProgress {
    pub processed_count: u64,
    pub total_items: Option<u64>,
    pub progress_percent: f64,
    pub message: Option<String>,
    pub status: OperationState,
}

/// Implemented by the Live-Update Fabric (C7) to receive operation events;
/// a `NullSink` is used where no fabric is wired (e.g. tests).
pub trait OperationSink: Send + Sync {
    fn on_progress(&self, id: OperationId, progress: OperationProgress);
    fn on_complete(&self, id: OperationId, result: Option<Value>);
    fn on_failed(&self, id: OperationId, error: String);
    fn on_cancelled(&self, id: OperationId);
}

pub struct NullSink;

impl OperationSink for NullSink {
    fn on_progress(&self, _id: OperationId, _progress: OperationProgress) {}
    fn on_complete(&self, _id: OperationId, _result: Option<Value>) {}
    fn on_failed(&self, _id: OperationId, _error: String) {}
    fn on_cancelled(&self, _id: OperationId) {}
}

type BoxBody = Box<dyn FnOnce(OperationHandle) -> BoxFuture<'static, CoreResult<Value>> + Send>;

struct QueueEntry {
    priority: Priority,
    seq: u64,
    id: OperationId,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; among equal priorities, lower `seq`
        // (older) first — a max-heap needs that reversed on the tie-break.
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Handle an operation body uses to report progress and observe
/// cancel/pause requests (spec §4.6: cooperative, polled between units of
/// work).
pub struct OperationHandle {
    id: OperationId,
    manager: Arc<OperationManager>,
    cancel_flag: Arc<AtomicBool>,
    pause_flag: Arc<AtomicBool>,
}

impl OperationHandle {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(AtomicOrdering::SeqCst)
    }

    /// Blocks while the operation is paused; returns immediately otherwise.
    pub async fn wait_if_paused(&self) {
        while self.pause_flag.load(AtomicOrdering::SeqCst) {
            tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
        }
    }

    pub fn update(&self, processed_count: u64, message: Option<String>) {
        self.manager.report_progress(self.id, processed_count, message);
    }
}

pub struct OperationManager {
    operations: DashMap<OperationId, Operation>,
    queue: Mutex<BinaryHeap<QueueEntry>>,
    pending: DashMap<OperationId, BoxBody>,
    cancel_flags: DashMap<OperationId, Arc<AtomicBool>>,
    pause_flags: DashMap<OperationId, Arc<AtomicBool>>,
    semaphore: Arc<Semaphore>,
    sink: Arc<dyn OperationSink>,
    seq: AtomicU64,
}

impl OperationManager {
    pub fn new(max_concurrent: usize, sink: Arc<dyn OperationSink>) -> Arc<Self> {
        Arc::new(Self {
            operations: DashMap::new(),
            queue: Mutex::new(BinaryHeap::new()),
            pending: DashMap::new(),
            cancel_flags: DashMap::new(),
            pause_flags: DashMap::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            sink,
            seq: AtomicU64::new(0),
        })
    }

    /// Registers an operation and enqueues it for scheduling. Returns the
    /// id immediately; the body runs once a slot frees up, never
    /// preempting an already-running operation (spec §4.6).
    pub fn spawn<F, Fut>(
        self: &Arc<Self>,
        kind: OperationKind,
        priority: Priority,
        total_items: Option<u64>,
        body: F,
    ) -> OperationId
    where
        F: FnOnce(OperationHandle) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = CoreResult<Value>> + Send + 'static,
    {
        let id = OperationId::new();
        self.operations.insert(
            id,
            Operation {
                id,
                kind,
                priority,
                state: OperationState::Queued,
                total_items,
                processed_count: 0,
                progress_percent: 0.0,
                started_at: None,
                finished_at: None,
                last_progress_at: None,
                error: None,
                result: None,
            },
        );
        self.cancel_flags.insert(id, Arc::new(AtomicBool::new(false)));
        self.pause_flags.insert(id, Arc::new(AtomicBool::new(false)));
        self.pending.insert(id, Box::new(move |handle| Box::pin(body(handle))));

        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        let manager = self.clone();
        tokio::spawn(async move {
            {
                let mut queue = manager.queue.lock().await;
                queue.push(QueueEntry { priority, seq, id });
            }
            manager.dispatch().await;
        });

        id
    }

    /// Drains as much of the queue as current semaphore capacity allows.
    async fn dispatch(self: Arc<Self>) {
        loop {
            let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let entry = {
                let mut queue = self.queue.lock().await;
                queue.pop()
            };
            let Some(entry) = entry else {
                drop(permit);
                return;
            };
            let Some((_, body)) = self.pending.remove(&entry.id) else {
                drop(permit);
                continue;
            };
            let cancelled = self
                .cancel_flags
                .get(&entry.id)
                .map(|f| f.load(AtomicOrdering::SeqCst))
                .unwrap_or(false);
            if cancelled {
                self.mark_cancelled(entry.id);
                drop(permit);
                continue;
            }

            self.mark_running(entry.id);
            let handle = OperationHandle {
                id: entry.id,
                manager: self.clone(),
                cancel_flag: self.cancel_flags.get(&entry.id).unwrap().clone(),
                pause_flag: self.pause_flags.get(&entry.id).unwrap().clone(),
            };
            let manager = self.clone();
            tokio::spawn(async move {
                let result = body(handle).await;
                manager.finish(entry.id, result);
                drop(permit);
                let next = manager.clone();
                tokio::spawn(async move { next.dispatch().await });
            });
        }
    }

    fn mark_running(&self, id: OperationId) {
        if let Some(mut op) = self.operations.get_mut(&id) {
            op.state = OperationState::Running;
            op.started_at = Some(Utc::now());
        }
        info!("operation {id}: running");
    }

    fn mark_cancelled(&self, id: OperationId) {
        if let Some(mut op) = self.operations.get_mut(&id) {
            op.state = OperationState::Cancelled;
            op.finished_at = Some(Utc::now());
        }
        self.cancel_flags.remove(&id);
        self.pause_flags.remove(&id);
        self.sink.on_cancelled(id);
    }

    fn finish(&self, id: OperationId, result: CoreResult<Value>) {
        match result {
            Ok(value) => {
                if let Some(mut op) = self.operations.get_mut(&id) {
                    op.state = OperationState::Completed;
                    op.finished_at = Some(Utc::now());
                    op.progress_percent = 100.0;
                    op.result = Some(value.clone());
                }
                self.sink.on_complete(id, Some(value));
            }
            Err(CoreError::Cancelled) => {
                self.mark_cancelled(id);
                return;
            }
            Err(e) => {
                let message = e.sanitized_message();
                warn!("operation {id}: failed: {message}");
                if let Some(mut op) = self.operations.get_mut(&id) {
                    op.state = OperationState::Failed;
                    op.finished_at = Some(Utc::now());
                    op.error = Some(message.clone());
                }
                self.sink.on_failed(id, message);
            }
        }
        self.cancel_flags.remove(&id);
        self.pause_flags.remove(&id);
    }

    /// Called by `OperationHandle::update`; rate-limited per
    /// `NOTIFICATION_INTERVAL` (spec §4.6).
    fn report_progress(&self, id: OperationId, processed_count: u64, message: Option<String>) {
        let now = Utc::now();
        let mut to_notify = None;
        if let Some(mut op) = self.operations.get_mut(&id) {
            op.processed_count = processed_count;
            if let Some(total) = op.total_items {
                if total > 0 {
                    op.progress_percent = (processed_count as f64 / total as f64 * 100.0).min(100.0);
                }
            }
            let elapsed_ok = op
                .last_progress_at
                .map(|t| now.signed_duration_since(t).to_std().unwrap_or_default() >= NOTIFICATION_INTERVAL)
                .unwrap_or(true);
            if elapsed_ok {
                op.last_progress_at = Some(now);
                to_notify = Some(OperationProgress {
                    processed_count: op.processed_count,
                    total_items: op.total_items,
                    progress_percent: op.progress_percent,
                    message,
                    status: op.state,
                });
            }
        }
        if let Some(progress) = to_notify {
            self.sink.on_progress(id, progress);
        }
    }

    pub fn cancel(&self, id: OperationId) -> bool {
        match self.cancel_flags.get(&id) {
            Some(flag) => {
                flag.store(true, AtomicOrdering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn pause(&self, id: OperationId) -> bool {
        let Some(flag) = self.pause_flags.get(&id) else {
            return false;
        };
        flag.store(true, AtomicOrdering::SeqCst);
        if let Some(mut op) = self.operations.get_mut(&id) {
            if op.state == OperationState::Running {
                op.state = OperationState::Paused;
            }
        }
        true
    }

    pub fn resume(&self, id: OperationId) -> bool {
        let Some(flag) = self.pause_flags.get(&id) else {
            return false;
        };
        flag.store(false, AtomicOrdering::SeqCst);
        if let Some(mut op) = self.operations.get_mut(&id) {
            if op.state == OperationState::Paused {
                op.state = OperationState::Running;
            }
        }
        true
    }

    pub fn get(&self, id: OperationId) -> Option<Operation> {
        self.operations.get(&id).map(|e| e.clone())
    }

    pub fn list_all(&self) -> Vec<Operation> {
        self.operations.iter().map(|e| e.clone()).collect()
    }

    pub fn list_active(&self) -> Vec<Operation> {
        self.operations
            .iter()
            .filter(|e| !e.state.is_terminal())
            .map(|e| e.clone())
            .collect()
    }

    /// Removes terminal records older than `max_age_hours` (spec §4.6).
    pub fn cleanup_completed_operations(&self, max_age_hours: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(max_age_hours);
        let stale: Vec<OperationId> = self
            .operations
            .iter()
            .filter(|e| e.state.is_terminal() && e.finished_at.map(|f| f < cutoff).unwrap_or(false))
            .map(|e| *e.key())
            .collect();
        for id in &stale {
            self.operations.remove(id);
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    async fn wait_for_terminal(manager: &Arc<OperationManager>, id: OperationId) -> Operation {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(op) = manager.get(id) {
                if op.state.is_terminal() {
                    return op;
                }
            }
            if Instant::now() > deadline {
                panic!("operation {id} did not reach a terminal state in time");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn completed_operation_reports_full_progress() {
        let manager = OperationManager::new(4, Arc::new(NullSink));
        let id = manager.spawn(OperationKind::ProcessVideos, Priority::Medium, Some(10), |handle| async move {
            for i in 1..=10u64 {
                handle.update(i, None);
            }
            Ok(json!({ "created": 10 }))
        });

        let op = wait_for_terminal(&manager, id).await;
        assert_eq!(op.state, OperationState::Completed);
        assert_eq!(op.progress_percent, 100.0);
        assert_eq!(op.processed_count, 10);
    }

    #[tokio::test]
    async fn failed_body_marks_operation_failed() {
        let manager = OperationManager::new(4, Arc::new(NullSink));
        let id = manager.spawn(OperationKind::VerifyIntegrity, Priority::Low, None, |_handle| async move {
            Err(CoreError::Fatal("boom".to_string()))
        });

        let op = wait_for_terminal(&manager, id).await;
        assert_eq!(op.state, OperationState::Failed);
        assert!(op.error.is_some());
    }

    #[tokio::test]
    async fn cooperative_cancel_stops_the_loop() {
        let manager = OperationManager::new(4, Arc::new(NullSink));
        let id = manager.spawn(OperationKind::ProcessVideos, Priority::Low, None, |handle| async move {
            loop {
                if handle.is_cancelled() {
                    return Err(CoreError::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(manager.cancel(id));
        let op = wait_for_terminal(&manager, id).await;
        assert_eq!(op.state, OperationState::Cancelled);
    }

    #[tokio::test]
    async fn higher_priority_queued_item_runs_first_when_a_slot_frees() {
        let manager = OperationManager::new(1, Arc::new(NullSink));
        // Occupy the only slot.
        let busy = manager.spawn(OperationKind::ProcessVideos, Priority::Low, None, |_h| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(json!(null))
        });

        // Two more queue up behind it; critical should dispatch before low.
        let low = manager.spawn(OperationKind::ProcessVideos, Priority::Low, None, |_h| async move { Ok(json!(null)) });
        let critical =
            manager.spawn(OperationKind::ProcessVideos, Priority::Critical, None, |_h| async move { Ok(json!(null)) });

        wait_for_terminal(&manager, busy).await;
        let critical_op = wait_for_terminal(&manager, critical).await;
        let low_op = wait_for_terminal(&manager, low).await;
        assert_eq!(critical_op.state, OperationState::Completed);
        assert_eq!(low_op.state, OperationState::Completed);
    }

    #[test]
    fn cleanup_removes_only_aged_terminal_records() {
        let manager = OperationManager::new(4, Arc::new(NullSink));
        let id = OperationId::new();
        manager.operations.insert(
            id,
            Operation {
                id,
                kind: OperationKind::ProcessVideos,
                priority: Priority::Low,
                state: OperationState::Completed,
                total_items: None,
                processed_count: 0,
                progress_percent: 100.0,
                started_at: None,
                finished_at: Some(Utc::now() - chrono::Duration::hours(48)),
                last_progress_at: None,
                error: None,
                result: None,
            },
        );
        let removed = manager.cleanup_completed_operations(24);
        assert_eq!(removed, 1);
        assert!(manager.get(id).is_none());
    }
}
