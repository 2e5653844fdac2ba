//! CheckpointStorage: checkpoint index with JSONL persistence
//!
//! The index lives in memory and is loaded lazily from disk on first use.
//! Every mutation rewrites the whole file, which stays small because the
//! record count is capped by LRU eviction. Disk failures are logged and the
//! store keeps working in memory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::config::CheckpointConfig;
use super::events::{CheckpointEvent, CheckpointEventSender, CleanupReason};
use super::models::{
    expiry_after, Checkpoint, CheckpointPage, CheckpointQuery, CheckpointStats, CheckpointStatus,
    SortOrder,
};

struct StoreState {
    loaded: bool,
    /// Recency order doubles as the LRU access order
    index: LruCache<String, Checkpoint>,
}

pub struct CheckpointStorage {
    file: Option<PathBuf>,
    max_checkpoints: usize,
    default_ttl: chrono::Duration,
    state: Mutex<StoreState>,
    events: CheckpointEventSender,
}

impl CheckpointStorage {
    pub fn new(config: &CheckpointConfig, events: CheckpointEventSender) -> Self {
        Self {
            file: config.persist.then(|| config.store_file()),
            max_checkpoints: config.effective_max_checkpoints(),
            default_ttl: config.default_ttl(),
            state: Mutex::new(StoreState {
                loaded: false,
                index: LruCache::unbounded(),
            }),
            events,
        }
    }

    /// In-memory store, nothing touches disk.
    pub fn in_memory(max_checkpoints: usize, events: CheckpointEventSender) -> Self {
        let config = CheckpointConfig {
            persist: false,
            max_checkpoints,
            ..Default::default()
        };
        Self::new(&config, events)
    }

    pub fn file_path(&self) -> Option<&PathBuf> {
        self.file.as_ref()
    }

    /// Upsert. Fills `expires_at` when absent and refreshes `updated_at`.
    pub async fn save(&self, mut checkpoint: Checkpoint) -> Checkpoint {
        let mut state = self.loaded_state().await;
        let now = Utc::now();

        let previous = state.index.peek(&checkpoint.id).cloned();
        checkpoint.updated_at = monotonic_now(now, &checkpoint, previous.as_ref());
        if checkpoint.expires_at.is_none() {
            let start = now.max(checkpoint.created_at);
            checkpoint.expires_at = Some(expiry_after(start, self.default_ttl));
        }

        state.index.put(checkpoint.id.clone(), checkpoint.clone());

        let mut evicted = 0;
        while state.index.len() > self.max_checkpoints {
            match state.index.pop_lru() {
                Some((id, _)) => {
                    debug!("Evicting least recently used checkpoint {}", id);
                    evicted += 1;
                }
                None => break,
            }
        }

        self.persist(&state).await;
        drop(state);

        match previous {
            None => self.events.send(CheckpointEvent::CheckpointCreated {
                checkpoint: checkpoint.clone(),
            }),
            Some(previous) if previous.status != checkpoint.status => {
                self.events.send(CheckpointEvent::CheckpointUpdated {
                    checkpoint: checkpoint.clone(),
                    previous_status: previous.status,
                })
            }
            Some(_) => {}
        }
        if evicted > 0 {
            self.events.send(CheckpointEvent::CheckpointsCleaned {
                count: evicted,
                reason: CleanupReason::MaxLimit,
            });
        }

        checkpoint
    }

    /// Lookup that counts as an access for eviction.
    pub async fn get(&self, id: &str) -> Option<Checkpoint> {
        let mut state = self.loaded_state().await;
        state.index.get(id).cloned()
    }

    /// Lookup that leaves the access order untouched.
    pub async fn peek(&self, id: &str) -> Option<Checkpoint> {
        let state = self.loaded_state().await;
        state.index.peek(id).cloned()
    }

    pub async fn query(&self, query: &CheckpointQuery) -> CheckpointPage {
        let state = self.loaded_state().await;
        let now = Utc::now();

        let mut matched: Vec<Checkpoint> = state
            .index
            .iter()
            .map(|(_, checkpoint)| checkpoint)
            .filter(|checkpoint| query.matches(checkpoint, now))
            .cloned()
            .collect();
        drop(state);

        matched.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if query.order == SortOrder::Desc {
            matched.reverse();
        }

        let total = matched.len();
        let limit = query.limit.unwrap_or(usize::MAX);
        let checkpoints: Vec<Checkpoint> =
            matched.into_iter().skip(query.offset).take(limit).collect();
        let has_more = query.offset.saturating_add(checkpoints.len()) < total;

        CheckpointPage {
            checkpoints,
            total,
            has_more,
        }
    }

    /// Returns false when `id` is unknown. No transition rules are applied here.
    pub async fn update_status(&self, id: &str, status: CheckpointStatus) -> bool {
        let mut state = self.loaded_state().await;
        let now = Utc::now();

        let Some(checkpoint) = state.index.get_mut(id) else {
            return false;
        };
        let previous_status = checkpoint.status;
        checkpoint.status = status;
        checkpoint.updated_at = now.max(checkpoint.updated_at).max(checkpoint.created_at);
        let updated = checkpoint.clone();

        self.persist(&state).await;
        drop(state);

        if previous_status != status {
            self.events.send(CheckpointEvent::CheckpointUpdated {
                checkpoint: updated,
                previous_status,
            });
        }
        true
    }

    pub async fn delete(&self, id: &str) -> bool {
        let mut state = self.loaded_state().await;
        if state.index.pop(id).is_none() {
            return false;
        }
        self.persist(&state).await;
        drop(state);

        self.events.send(CheckpointEvent::CheckpointDeleted {
            checkpoint_id: id.to_string(),
        });
        true
    }

    /// Most recently created checkpoint for an execution.
    pub async fn get_by_execution_id(&self, execution_id: &str) -> Option<Checkpoint> {
        let mut state = self.loaded_state().await;
        let id = state
            .index
            .iter()
            .map(|(_, checkpoint)| checkpoint)
            .filter(|checkpoint| checkpoint.execution_id.as_deref() == Some(execution_id))
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
            .map(|checkpoint| checkpoint.id.clone())?;
        state.index.get(&id).cloned()
    }

    pub async fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now()).await
    }

    pub(crate) async fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.loaded_state().await;
        let expired: Vec<String> = state
            .index
            .iter()
            .filter(|(_, checkpoint)| checkpoint.is_expired_at(now))
            .map(|(id, _)| id.clone())
            .collect();

        if expired.is_empty() {
            return 0;
        }
        for id in &expired {
            state.index.pop(id);
        }
        self.persist(&state).await;
        drop(state);

        debug!("Removed {} expired checkpoints", expired.len());
        self.events.send(CheckpointEvent::CheckpointsCleaned {
            count: expired.len(),
            reason: CleanupReason::Expired,
        });
        expired.len()
    }

    pub async fn stats(&self) -> CheckpointStats {
        let state = self.loaded_state().await;
        let mut by_status = BTreeMap::new();
        let mut by_tier = BTreeMap::new();

        for (_, checkpoint) in state.index.iter() {
            *by_status
                .entry(checkpoint.status.as_str().to_string())
                .or_insert(0) += 1;
            if let Some(tier) = &checkpoint.tier {
                *by_tier.entry(tier.clone()).or_insert(0) += 1;
            }
        }

        CheckpointStats {
            total: state.index.len(),
            by_status,
            by_tier,
        }
    }

    pub async fn len(&self) -> usize {
        self.loaded_state().await.index.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn loaded_state(&self) -> tokio::sync::MutexGuard<'_, StoreState> {
        let mut state = self.state.lock().await;
        if !state.loaded {
            state.loaded = true;
            if let Some(file) = &self.file {
                self.load_into(file, &mut state.index).await;
            }
        }
        state
    }

    async fn load_into(&self, file: &Path, index: &mut LruCache<String, Checkpoint>) {
        let content = match tokio::fs::read_to_string(file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(
                    "Failed to read checkpoint store {}: {}; continuing in memory",
                    file.display(),
                    e
                );
                return;
            }
        };

        let mut skipped = 0;
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Checkpoint>(line) {
                // file order is least recently used first
                Ok(checkpoint) => {
                    index.put(checkpoint.id.clone(), checkpoint);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(
                        "Skipping corrupt checkpoint record at {}:{}: {}",
                        file.display(),
                        line_no + 1,
                        e
                    );
                }
            }
        }

        while index.len() > self.max_checkpoints {
            index.pop_lru();
        }
        debug!(
            "Loaded {} checkpoints from {} ({} skipped)",
            index.len(),
            file.display(),
            skipped
        );
    }

    async fn persist(&self, state: &StoreState) {
        let Some(file) = &self.file else {
            return;
        };

        let mut content = String::new();
        for (_, checkpoint) in state.index.iter().rev() {
            match serde_json::to_string(checkpoint) {
                Ok(line) => {
                    content.push_str(&line);
                    content.push('\n');
                }
                Err(e) => warn!("Failed to serialize checkpoint {}: {}", checkpoint.id, e),
            }
        }

        if let Err(e) = write_atomic(file, content.as_bytes()).await {
            warn!(
                "Failed to persist checkpoint store {}: {}; continuing in memory",
                file.display(),
                e
            );
        }
    }
}

fn monotonic_now(
    now: DateTime<Utc>,
    checkpoint: &Checkpoint,
    previous: Option<&Checkpoint>,
) -> DateTime<Utc> {
    let floor = previous
        .map(|previous| previous.updated_at)
        .unwrap_or(checkpoint.created_at)
        .max(checkpoint.created_at);
    now.max(floor)
}

async fn write_atomic(file: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = file.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = file.with_extension("jsonl.tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, file).await
}
