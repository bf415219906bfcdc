//! Single-node consensus engine.
//!
//! Wraps the [`Fsm`] behind a durable command log. Every mutation flows
//! through one apply worker: append to the log, apply to the store, advance
//! the applied watermark, compact when the log grows past the snapshot
//! threshold. The single apply path makes commits totally ordered.
//!
//! On startup the node replays any log entries above the persisted applied
//! watermark — safe because commands are idempotent — and a `bootstrap`
//! configuration self-elects immediately. An entry that cannot be applied
//! halts the node: a diverged state machine is more dangerous than a
//! stopped one.

use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{error, info, warn};

use crate::command::Command;
use crate::error::RaftError;
use crate::fsm::Fsm;
use crate::log_store::{LogStore, StableStore};

/// Filename of the command log under the data directory.
pub const LOG_FILE: &str = "raft-log.redb";
/// Filename of the stable metadata store under the data directory.
pub const STABLE_FILE: &str = "raft-stable.redb";
/// Filename of the compaction snapshot under the data directory.
pub const SNAPSHOT_FILE: &str = "snapshot.db";

const DEFAULT_SNAPSHOT_THRESHOLD: u64 = 1024;
const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Node configuration.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// Stable identifier of this node.
    pub node_id: String,
    /// Directory holding the log, stable store, and snapshots.
    pub data_dir: PathBuf,
    /// Whether to self-elect as the leader of a fresh single-node cluster.
    pub bootstrap: bool,
    /// Number of applied log entries to retain before compacting into a
    /// snapshot.
    pub snapshot_threshold: u64,
    /// How long a caller waits for its command to commit before receiving
    /// an unknown-outcome timeout.
    pub commit_timeout: Duration,
}

impl RaftConfig {
    /// Configuration for a bootstrapping single node with default tuning.
    pub fn new(node_id: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            node_id: node_id.into(),
            data_dir: data_dir.into(),
            bootstrap: true,
            snapshot_threshold: DEFAULT_SNAPSHOT_THRESHOLD,
            commit_timeout: DEFAULT_COMMIT_TIMEOUT,
        }
    }
}

struct Proposal {
    entry: Vec<u8>,
    done: oneshot::Sender<Result<u64, RaftError>>,
}

struct Shared {
    fsm: Fsm,
    log: LogStore,
    stable: StableStore,
    leader: AtomicBool,
    halted: AtomicBool,
    node_id: String,
    snapshot_path: PathBuf,
    snapshot_threshold: u64,
}

/// A consensus node sequencing mutations through a durable log.
pub struct RaftNode {
    shared: Arc<Shared>,
    submit_tx: mpsc::Sender<Proposal>,
    commit_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RaftNode {
    /// Open (or create) a node over the given store.
    ///
    /// Recovers by replaying log entries above the applied watermark, then
    /// self-elects when `bootstrap` is set and starts the apply worker.
    ///
    /// # Errors
    ///
    /// - [`RaftError::Log`] / [`RaftError::Stable`] if the durable stores
    ///   cannot be opened.
    /// - [`RaftError::Apply`] if a committed entry cannot be replayed —
    ///   startup aborts rather than running with a diverged store.
    pub async fn open(
        config: RaftConfig,
        store: Arc<dyn rune_storage::VaultStore>,
    ) -> Result<Self, RaftError> {
        fs::create_dir_all(&config.data_dir).map_err(|e| RaftError::Log {
            reason: format!("failed to create data directory: {e}"),
        })?;

        let log_path = config.data_dir.join(LOG_FILE);
        let stable_path = config.data_dir.join(STABLE_FILE);
        let (log, stable) = run_blocking(move || {
            Ok((LogStore::open(log_path)?, StableStore::open(stable_path)?))
        })
        .await?;

        let fsm = Fsm::new(store);

        // Replay anything committed but not yet applied. Idempotent apply
        // makes this safe after a crash between append and apply.
        let mut last_applied = {
            let stable = stable.clone();
            run_blocking(move || stable.get_u64("last_applied")).await?
        };
        let pending = {
            let log = log.clone();
            let from = last_applied;
            run_blocking(move || log.entries_after(from)).await?
        };
        for (index, entry) in pending {
            fsm.apply(&entry).await?;
            last_applied = index;
        }
        if last_applied > 0 {
            let stable_clone = stable.clone();
            run_blocking(move || stable_clone.set_u64("last_applied", last_applied)).await?;
        }

        let leader = config.bootstrap;
        if leader {
            let term = {
                let stable = stable.clone();
                run_blocking(move || stable.get_u64("current_term")).await?
            }
            .saturating_add(1);
            let stable_clone = stable.clone();
            let node_id = config.node_id.clone();
            run_blocking(move || {
                stable_clone.set_u64("current_term", term)?;
                stable_clone.set_string("voted_for", &node_id)
            })
            .await?;
            info!(
                node_id = %config.node_id,
                term,
                "bootstrap complete, node is leader"
            );
        }

        let shared = Arc::new(Shared {
            fsm,
            log,
            stable,
            leader: AtomicBool::new(leader),
            halted: AtomicBool::new(false),
            node_id: config.node_id,
            snapshot_path: config.data_dir.join(SNAPSHOT_FILE),
            snapshot_threshold: config.snapshot_threshold.max(1),
        });

        let (submit_tx, submit_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(run_worker(
            Arc::clone(&shared),
            submit_rx,
            shutdown_rx,
            last_applied.saturating_add(1),
        ));

        Ok(Self {
            shared,
            submit_tx,
            commit_timeout: config.commit_timeout,
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stop the apply worker and release the durable stores.
    ///
    /// The in-flight proposal finishes first; proposals submitted after
    /// this call fail. After shutdown the log and stable files are unlocked
    /// and may be reopened.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Submit a command and wait for it to commit and apply.
    ///
    /// Returns the commit index.
    ///
    /// # Errors
    ///
    /// - [`RaftError::NotLeader`] if this node cannot accept mutations.
    /// - [`RaftError::Timeout`] if the wait expired — the entry may still
    ///   commit; retrying is safe because commands are idempotent.
    /// - [`RaftError::Halted`] / [`RaftError::Apply`] if the state machine
    ///   has failed fatally.
    pub async fn submit(&self, command: &Command) -> Result<u64, RaftError> {
        if !self.is_leader() {
            return Err(RaftError::NotLeader);
        }
        let entry = command.encode()?;
        let (done, rx) = oneshot::channel();
        self.submit_tx
            .send(Proposal { entry, done })
            .await
            .map_err(|_| RaftError::Halted {
                reason: "apply worker has stopped".to_owned(),
            })?;

        match tokio::time::timeout(self.commit_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RaftError::Halted {
                reason: "apply worker has stopped".to_owned(),
            }),
            Err(_) => Err(RaftError::Timeout),
        }
    }

    /// Whether this node is currently the leader.
    pub fn is_leader(&self) -> bool {
        self.shared.leader.load(Ordering::Acquire) && !self.shared.halted.load(Ordering::Acquire)
    }

    /// Identifier of the leader, if known.
    pub fn leader_id(&self) -> Option<String> {
        self.is_leader().then(|| self.shared.node_id.clone())
    }

    /// Whether the state machine has halted after a fatal apply failure.
    pub fn is_halted(&self) -> bool {
        self.shared.halted.load(Ordering::Acquire)
    }

    /// Index of the last applied entry.
    ///
    /// # Errors
    ///
    /// Returns [`RaftError::Stable`] if the stable store fails.
    pub async fn last_applied(&self) -> Result<u64, RaftError> {
        let stable = self.shared.stable.clone();
        run_blocking(move || stable.get_u64("last_applied")).await
    }
}

impl std::fmt::Debug for RaftNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftNode")
            .field("node_id", &self.shared.node_id)
            .field("leader", &self.is_leader())
            .finish_non_exhaustive()
    }
}

/// The apply worker: the only path that appends to the log and mutates the
/// store, making commits totally ordered.
async fn run_worker(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<Proposal>,
    mut shutdown: watch::Receiver<bool>,
    mut next_index: u64,
) {
    loop {
        let proposal = tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(proposal) => proposal,
                None => break,
            },
            _ = shutdown.changed() => break,
        };
        let Proposal { entry, done } = proposal;

        if shared.halted.load(Ordering::Acquire) {
            let _ = done.send(Err(RaftError::Halted {
                reason: "state machine halted after apply failure".to_owned(),
            }));
            continue;
        }

        let result = commit_one(&shared, next_index, entry).await;
        match &result {
            Ok(index) => {
                next_index = index.saturating_add(1);
            }
            Err(RaftError::Apply { reason }) => {
                error!(reason = %reason, "apply failed, halting state machine");
                shared.halted.store(true, Ordering::Release);
            }
            Err(_) => {}
        }
        // The caller may have given up waiting; a dropped receiver is fine.
        let _ = done.send(result);
    }
}

/// Append one entry, apply it, persist the watermark, and maybe compact.
async fn commit_one(shared: &Shared, index: u64, entry: Vec<u8>) -> Result<u64, RaftError> {
    {
        let log = shared.log.clone();
        let entry = entry.clone();
        run_blocking(move || log.append(index, &entry)).await?;
    }

    shared.fsm.apply(&entry).await?;

    {
        let stable = shared.stable.clone();
        run_blocking(move || stable.set_u64("last_applied", index)).await?;
    }

    // Compaction failure is not fatal: the entry is already durable and
    // applied, the log is just longer than we would like.
    if let Err(e) = maybe_compact(shared, index).await {
        warn!(error = %e, "log compaction failed");
    }

    Ok(index)
}

/// Snapshot the store and truncate the applied log prefix once the log
/// exceeds the snapshot threshold.
async fn maybe_compact(shared: &Shared, applied_index: u64) -> Result<(), RaftError> {
    let log_len = {
        let log = shared.log.clone();
        run_blocking(move || log.len()).await?
    };
    if log_len < shared.snapshot_threshold {
        return Ok(());
    }

    let fsm = shared.fsm.clone();
    let snapshot_path = shared.snapshot_path.clone();
    run_blocking(move || {
        let staging = snapshot_path.with_extension("tmp");
        let mut sink = fs::File::create(&staging).map_err(|e| RaftError::Snapshot {
            reason: format!("failed to create snapshot sink: {e}"),
        })?;
        if let Err(e) = fsm.snapshot(&mut sink).and_then(|()| {
            sink.flush().map_err(|e| RaftError::Snapshot {
                reason: e.to_string(),
            })
        }) {
            // Cancel the sink: a partial snapshot must not be mistaken for
            // a complete one.
            drop(sink);
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
        fs::rename(&staging, &snapshot_path).map_err(|e| RaftError::Snapshot {
            reason: format!("failed to finalize snapshot: {e}"),
        })
    })
    .await?;

    {
        let stable = shared.stable.clone();
        run_blocking(move || stable.set_u64("snapshot_index", applied_index)).await?;
    }
    {
        let log = shared.log.clone();
        run_blocking(move || log.truncate_through(applied_index)).await?;
    }

    info!(index = applied_index, "log compacted into snapshot");
    Ok(())
}

async fn run_blocking<T, F>(f: F) -> Result<T, RaftError>
where
    F: FnOnce() -> Result<T, RaftError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RaftError::Log {
            reason: format!("blocking task panicked: {e}"),
        })?
}

#[cfg(test)]
mod tests {
    use rune_storage::{MemoryBackend, RedbStore, StorageBackend, StoreImage, VaultStore};

    use super::*;

    fn memory_store() -> Arc<dyn VaultStore> {
        Arc::new(MemoryBackend::new())
    }

    fn config(dir: &tempfile::TempDir) -> RaftConfig {
        RaftConfig::new("node-1", dir.path().join("raft"))
    }

    #[tokio::test]
    async fn bootstrap_self_elects() {
        let dir = tempfile::tempdir().unwrap();
        let node = RaftNode::open(config(&dir), memory_store()).await.unwrap();
        assert!(node.is_leader());
        assert_eq!(node.leader_id(), Some("node-1".to_owned()));
    }

    #[tokio::test]
    async fn non_bootstrap_rejects_submit() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&dir);
        cfg.bootstrap = false;
        let node = RaftNode::open(cfg, memory_store()).await.unwrap();
        assert!(!node.is_leader());

        let err = node
            .submit(&Command::Delete { key: "k".to_owned() })
            .await
            .unwrap_err();
        assert!(matches!(err, RaftError::NotLeader));
    }

    #[tokio::test]
    async fn submit_set_and_delete_drive_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryBackend::new());
        let node = RaftNode::open(config(&dir), Arc::clone(&store) as Arc<dyn VaultStore>)
            .await
            .unwrap();

        let index = node
            .submit(&Command::Set {
                key: "hello".to_owned(),
                value: b"world".to_vec(),
            })
            .await
            .unwrap();
        assert_eq!(index, 1);
        assert_eq!(store.get("hello").await.unwrap(), Some(b"world".to_vec()));

        let index = node
            .submit(&Command::Delete {
                key: "hello".to_owned(),
            })
            .await
            .unwrap();
        assert_eq!(index, 2);
        assert_eq!(store.get("hello").await.unwrap(), None);
        assert_eq!(node.last_applied().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn state_survives_node_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryBackend::new());
        {
            let node = RaftNode::open(config(&dir), Arc::clone(&store) as Arc<dyn VaultStore>)
                .await
                .unwrap();
            node.submit(&Command::Set {
                key: "k".to_owned(),
                value: b"v".to_vec(),
            })
            .await
            .unwrap();
            node.shutdown().await;
        }

        let node = RaftNode::open(config(&dir), Arc::clone(&store) as Arc<dyn VaultStore>)
            .await
            .unwrap();
        // Nothing to replay; watermark already caught up.
        assert_eq!(node.last_applied().await.unwrap(), 1);
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        // And the node keeps accepting writes at the next index.
        let index = node
            .submit(&Command::Set {
                key: "k2".to_owned(),
                value: b"v2".to_vec(),
            })
            .await
            .unwrap();
        assert_eq!(index, 2);
    }

    #[tokio::test]
    async fn recovery_replays_unapplied_entries() {
        let dir = tempfile::tempdir().unwrap();
        let raft_dir = dir.path().join("raft");
        fs::create_dir_all(&raft_dir).unwrap();

        // Simulate a crash after append but before apply: the entry is in
        // the log but the watermark never advanced.
        {
            let log = LogStore::open(raft_dir.join(LOG_FILE)).unwrap();
            let entry = Command::Set {
                key: "recovered".to_owned(),
                value: b"yes".to_vec(),
            }
            .encode()
            .unwrap();
            log.append(1, &entry).unwrap();
        }

        let store = Arc::new(MemoryBackend::new());
        let node = RaftNode::open(config(&dir), Arc::clone(&store) as Arc<dyn VaultStore>)
            .await
            .unwrap();
        assert_eq!(store.get("recovered").await.unwrap(), Some(b"yes".to_vec()));
        assert_eq!(node.last_applied().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unrecognized_committed_entry_aborts_startup() {
        let dir = tempfile::tempdir().unwrap();
        let raft_dir = dir.path().join("raft");
        fs::create_dir_all(&raft_dir).unwrap();
        {
            let log = LogStore::open(raft_dir.join(LOG_FILE)).unwrap();
            log.append(1, br#"{"op":"rotate","key":"k"}"#).unwrap();
        }

        let err = RaftNode::open(config(&dir), memory_store())
            .await
            .unwrap_err();
        assert!(matches!(err, RaftError::Apply { .. }));
    }

    #[tokio::test]
    async fn compaction_truncates_log_and_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&dir);
        cfg.snapshot_threshold = 3;
        let store = Arc::new(MemoryBackend::new());
        let node = RaftNode::open(cfg.clone(), Arc::clone(&store) as Arc<dyn VaultStore>)
            .await
            .unwrap();

        for i in 0..5u8 {
            node.submit(&Command::Set {
                key: format!("key/{i}"),
                value: vec![i],
            })
            .await
            .unwrap();
        }

        let snapshot_path = cfg.data_dir.join(SNAPSHOT_FILE);
        assert!(snapshot_path.exists());
        node.shutdown().await;
        drop(node);

        // The log was truncated at least once; all data is still readable.
        let log = LogStore::open(cfg.data_dir.join(LOG_FILE)).unwrap();
        assert!(log.len().unwrap() < 5);
        for i in 0..5u8 {
            assert_eq!(
                store.get(&format!("key/{i}")).await.unwrap(),
                Some(vec![i])
            );
        }

        // The snapshot image restores into a fresh store.
        let fresh = MemoryBackend::new();
        let mut reader = fs::File::open(&snapshot_path).unwrap();
        fresh.restore(&mut reader).unwrap();
        assert_eq!(fresh.get("key/0").await.unwrap(), Some(vec![0]));
    }

    #[tokio::test]
    async fn apply_failure_halts_node() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RedbStore::open(dir.path().join("rune.db")).unwrap());
        let node = RaftNode::open(config(&dir), Arc::clone(&store) as Arc<dyn VaultStore>)
            .await
            .unwrap();

        // Kill the store out from under the node; the next apply fails.
        store.close();
        let err = node
            .submit(&Command::Set {
                key: "k".to_owned(),
                value: b"v".to_vec(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RaftError::Apply { .. }));
        assert!(node.is_halted());

        // The node refuses everything from here on.
        let err = node
            .submit(&Command::Delete { key: "k".to_owned() })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RaftError::NotLeader | RaftError::Halted { .. }
        ));
    }

    #[tokio::test]
    async fn term_increases_across_bootstraps() {
        let dir = tempfile::tempdir().unwrap();
        {
            let node = RaftNode::open(config(&dir), memory_store()).await.unwrap();
            node.shutdown().await;
        }
        {
            let node = RaftNode::open(config(&dir), memory_store()).await.unwrap();
            node.shutdown().await;
        }
        let stable = StableStore::open(dir.path().join("raft").join(STABLE_FILE)).unwrap();
        assert_eq!(stable.get_u64("current_term").unwrap(), 2);
        assert_eq!(
            stable.get_string("voted_for").unwrap(),
            Some("node-1".to_owned())
        );
    }
}
