//! Compile-job queues for queue mode.
//!
//! One queue per compiler target. A delivery moves a message to "in flight";
//! the consumer acks it once its artifact or failure is recorded. Unacked
//! deliveries are returned to the queue by [`WorkQueue::recover`].

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use difftest_types::QueueMessage;

/// A message handed to one consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: String,
    pub message: QueueMessage,
}

pub trait WorkQueue: Send + Sync {
    fn name(&self) -> &str;

    fn publish(&self, message: &QueueMessage) -> Result<()>;

    /// Take the oldest ready message, if any.
    fn receive(&self) -> Result<Option<Delivery>>;

    fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Return in-flight deliveries to the queue. Returns how many moved.
    fn recover(&self) -> Result<usize>;
}

// ============================================================================
// In-memory queue
// ============================================================================

#[derive(Default)]
struct MemoryQueueInner {
    ready: VecDeque<Delivery>,
    in_flight: Vec<Delivery>,
}

pub struct MemoryQueue {
    name: String,
    inner: Mutex<MemoryQueueInner>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(MemoryQueueInner::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WorkQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, message: &QueueMessage) -> Result<()> {
        self.inner.lock().ready.push_back(Delivery {
            receipt: Uuid::new_v4().to_string(),
            message: message.clone(),
        });
        Ok(())
    }

    fn receive(&self) -> Result<Option<Delivery>> {
        let mut inner = self.inner.lock();
        let delivery = inner.ready.pop_front();
        if let Some(d) = &delivery {
            inner.in_flight.push(d.clone());
        }
        Ok(delivery)
    }

    fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.inner
            .lock()
            .in_flight
            .retain(|d| d.receipt != delivery.receipt);
        Ok(())
    }

    fn recover(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        let returned: Vec<Delivery> = inner.in_flight.drain(..).collect();
        let count = returned.len();
        for d in returned.into_iter().rev() {
            inner.ready.push_front(d);
        }
        Ok(count)
    }
}

// ============================================================================
// Directory spool
// ============================================================================

static PUBLISH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Queue spooled to a directory: `ready/` and `in_flight/`, one JSON file per
/// message, named so lexical order is publish order. Receiving is a rename,
/// so concurrent consumers never take the same message.
pub struct SpoolQueue {
    name: String,
    ready: PathBuf,
    in_flight: PathBuf,
}

impl SpoolQueue {
    pub fn open(name: impl Into<String>, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let ready = dir.join("ready");
        let in_flight = dir.join("in_flight");
        for d in [&ready, &in_flight] {
            fs::create_dir_all(d).with_context(|| format!("failed to create {}", d.display()))?;
        }
        Ok(Self {
            name: name.into(),
            ready,
            in_flight,
        })
    }

    fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("failed to list {}", dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

impl WorkQueue for SpoolQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, message: &QueueMessage) -> Result<()> {
        let stem = format!(
            "{}_{:010}_{}",
            Utc::now().format("%Y%m%dT%H%M%S%.9f"),
            PUBLISH_SEQ.fetch_add(1, Ordering::Relaxed),
            Uuid::new_v4().simple()
        );
        let tmp = self.ready.join(format!(".{stem}.tmp"));
        fs::write(&tmp, serde_json::to_vec(message)?)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, self.ready.join(format!("{stem}.json")))
            .with_context(|| format!("failed to publish to queue {}", self.name))
    }

    fn receive(&self) -> Result<Option<Delivery>> {
        for path in Self::sorted_entries(&self.ready)? {
            let Some(file_name) = path.file_name() else {
                continue;
            };
            let target = self.in_flight.join(file_name);
            match fs::rename(&path, &target) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e).context("failed to take queue message"),
            }
            let bytes = fs::read(&target)
                .with_context(|| format!("failed to read {}", target.display()))?;
            let message: QueueMessage = serde_json::from_slice(&bytes)
                .with_context(|| format!("malformed queue message {}", target.display()))?;
            debug!(queue = %self.name, generation_id = %message.generation_id, "received");
            return Ok(Some(Delivery {
                receipt: file_name.to_string_lossy().into_owned(),
                message,
            }));
        }
        Ok(None)
    }

    fn ack(&self, delivery: &Delivery) -> Result<()> {
        let path = self.in_flight.join(&delivery.receipt);
        match fs::remove_file(&path) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                Err(e).with_context(|| format!("failed to ack {}", path.display()))
            }
            _ => Ok(()),
        }
    }

    fn recover(&self) -> Result<usize> {
        let mut count = 0;
        for path in Self::sorted_entries(&self.in_flight)? {
            if let Some(name) = path.file_name() {
                if fs::rename(&path, self.ready.join(name)).is_ok() {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

/// Publishes every message to all of its queues.
#[derive(Clone, Default)]
pub struct FanoutQueue {
    queues: Vec<Arc<dyn WorkQueue>>,
}

impl FanoutQueue {
    pub fn new(queues: Vec<Arc<dyn WorkQueue>>) -> Self {
        Self { queues }
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.queues.iter().map(|q| q.name()).collect()
    }

    /// Publish to every queue not listed in `delivered`, in order, calling
    /// `sent` after each one. Stops at the first failure; queues already
    /// published to have been reported through `sent` by then.
    pub fn publish_missing(
        &self,
        message: &QueueMessage,
        delivered: &BTreeSet<String>,
        mut sent: impl FnMut(&str) -> Result<()>,
    ) -> Result<usize> {
        let mut count = 0;
        for queue in self.queues.iter().filter(|q| !delivered.contains(q.name())) {
            queue
                .publish(message)
                .with_context(|| format!("failed to publish to queue {}", queue.name()))?;
            sent(queue.name())?;
            count += 1;
        }
        Ok(count)
    }
}
