//! Fan-out of compiled generations to the compiler targets.
//!
//! Every target a generation reaches is recorded in the store, so a fan-out
//! that failed halfway is finished by the next `distribute` of the same
//! record instead of being skipped.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use difftest_types::{GenerationRecord, QueueMessage, RunEntry, RunState};

use crate::queue::FanoutQueue;
use crate::store::RecordStore;

/// How compile workers learn about new generations.
#[derive(Clone)]
pub enum DistributionMode {
    /// Publish one message per compiler queue.
    Queue(FanoutQueue),
    /// Index the generation for each listed target to poll from the store.
    StorePoll { targets: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// Number of queues published to by this call.
    Published(usize),
    /// Number of targets indexed by this call.
    Enqueued(usize),
    /// The reference compile failed; only the marker was written.
    NotCompiled,
    /// Every target had already been reached; nothing was sent again.
    AlreadyDistributed,
}

pub struct WorkDistributor {
    store: Arc<dyn RecordStore>,
    mode: DistributionMode,
}

impl WorkDistributor {
    pub fn new(store: Arc<dyn RecordStore>, mode: DistributionMode) -> Self {
        Self { store, mode }
    }

    /// Write the run marker for `record`, then hand it to every compile
    /// worker that has not received it yet, when the reference compile
    /// succeeded.
    ///
    /// The marker is written before any worker can see the generation, so
    /// the aggregator always finds it first.
    pub fn distribute(&self, record: &GenerationRecord) -> Result<Distribution> {
        let state = if record.compilation.is_success() {
            RunState::Pending
        } else {
            RunState::NotCompiled
        };
        let inserted = self
            .store
            .insert_run_entry(&RunEntry::marker(record.id.clone(), state))?;
        if !inserted {
            let current = self.store.get_run_entry(&record.id)?.map(|e| e.state);
            if current != Some(RunState::Pending) {
                debug!(generation_id = %record.id, ?current, "run marker settled, skipping distribution");
                return Ok(Distribution::AlreadyDistributed);
            }
        } else if state == RunState::NotCompiled {
            return Ok(Distribution::NotCompiled);
        }

        let delivered: BTreeSet<String> = self.store.deliveries(&record.id)?.into_iter().collect();
        let record_delivery = |target: &str| self.store.record_delivery(&record.id, target);
        let distribution = match &self.mode {
            DistributionMode::Queue(fanout) => Distribution::Published(fanout.publish_missing(
                &QueueMessage::from_record(record),
                &delivered,
                record_delivery,
            )?),
            DistributionMode::StorePoll { targets } => {
                let mut count = 0;
                for target in targets.iter().filter(|t| !delivered.contains(*t)) {
                    self.store.enqueue_compile(target, &record.id)?;
                    record_delivery(target.as_str())?;
                    count += 1;
                }
                Distribution::Enqueued(count)
            }
        };
        if matches!(distribution, Distribution::Published(0) | Distribution::Enqueued(0))
            && !inserted
        {
            debug!(generation_id = %record.id, "every target already reached");
            return Ok(Distribution::AlreadyDistributed);
        }
        if !delivered.is_empty() {
            info!(generation_id = %record.id, ?distribution, resumed_after = delivered.len(), "distribution resumed");
        } else {
            info!(generation_id = %record.id, ?distribution, "distributed");
        }
        Ok(distribution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryQueue, WorkQueue};
    use crate::store::{conformance, MemoryStore};
    use difftest_types::CompileOutcome;

    #[test]
    fn test_queue_mode_publishes_once() {
        let store = Arc::new(MemoryStore::new());
        let q1 = Arc::new(MemoryQueue::new("v1"));
        let q2 = Arc::new(MemoryQueue::new("v2"));
        let fanout = FanoutQueue::new(vec![q1.clone() as Arc<dyn WorkQueue>, q2.clone()]);
        let distributor = WorkDistributor::new(store.clone(), DistributionMode::Queue(fanout));

        let record = conformance::generation("g1");
        assert_eq!(
            distributor.distribute(&record).unwrap(),
            Distribution::Published(2)
        );
        assert_eq!(
            distributor.distribute(&record).unwrap(),
            Distribution::AlreadyDistributed
        );
        assert_eq!(q1.len(), 1);
        assert_eq!(q2.len(), 1);
        let entry = store.get_run_entry("g1").unwrap().unwrap();
        assert_eq!(entry.state, RunState::Pending);
    }

    /// Queue that refuses every publish.
    struct ClosedQueue;

    impl WorkQueue for ClosedQueue {
        fn name(&self) -> &str {
            "v2"
        }

        fn publish(&self, _: &QueueMessage) -> Result<()> {
            Err(anyhow::anyhow!("queue closed"))
        }

        fn receive(&self) -> Result<Option<crate::queue::Delivery>> {
            Ok(None)
        }

        fn ack(&self, _: &crate::queue::Delivery) -> Result<()> {
            Ok(())
        }

        fn recover(&self) -> Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn test_retry_finishes_a_partial_fanout() {
        let store = Arc::new(MemoryStore::new());
        let q1 = Arc::new(MemoryQueue::new("v1"));
        let failing = FanoutQueue::new(vec![
            q1.clone() as Arc<dyn WorkQueue>,
            Arc::new(ClosedQueue),
        ]);
        let record = conformance::generation("g1");

        let first = WorkDistributor::new(store.clone(), DistributionMode::Queue(failing));
        let err = first.distribute(&record).unwrap_err();
        assert!(format!("{err:#}").contains("failed to publish to queue v2"));
        assert_eq!(q1.len(), 1);
        assert_eq!(store.deliveries("g1").unwrap(), vec!["v1"]);

        // Same queue names, second endpoint reachable again.
        let q2 = Arc::new(MemoryQueue::new("v2"));
        let healed = FanoutQueue::new(vec![q1.clone() as Arc<dyn WorkQueue>, q2.clone()]);
        let retry = WorkDistributor::new(store.clone(), DistributionMode::Queue(healed));
        assert_eq!(retry.distribute(&record).unwrap(), Distribution::Published(1));
        assert_eq!(q1.len(), 1);
        assert_eq!(q2.len(), 1);
        assert_eq!(
            retry.distribute(&record).unwrap(),
            Distribution::AlreadyDistributed
        );
        assert_eq!(
            store.get_run_entry("g1").unwrap().unwrap().state,
            RunState::Pending
        );
    }

    #[test]
    fn test_store_poll_mode_enqueues_every_target() {
        let store = Arc::new(MemoryStore::new());
        let distributor = WorkDistributor::new(
            store.clone(),
            DistributionMode::StorePoll {
                targets: vec!["v1".into(), "v2".into()],
            },
        );
        distributor
            .distribute(&conformance::generation("g1"))
            .unwrap();
        assert_eq!(store.pending_compiles("v1").unwrap(), vec!["g1"]);
        assert_eq!(store.pending_compiles("v2").unwrap(), vec!["g1"]);
    }

    #[test]
    fn test_failed_reference_compile_only_marks() {
        let store = Arc::new(MemoryStore::new());
        let distributor = WorkDistributor::new(
            store.clone(),
            DistributionMode::StorePoll {
                targets: vec!["v1".into()],
            },
        );
        let mut record = conformance::generation("g1");
        record.compilation = CompileOutcome::Failure {
            error_type: "StructureException".into(),
            error_message: "bad".into(),
        };
        assert_eq!(
            distributor.distribute(&record).unwrap(),
            Distribution::NotCompiled
        );
        assert!(store.pending_compiles("v1").unwrap().is_empty());
        assert_eq!(
            store.get_run_entry("g1").unwrap().unwrap().state,
            RunState::NotCompiled
        );
    }
}
