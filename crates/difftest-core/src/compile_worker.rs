//! Per-target compile worker.
//!
//! Takes compile jobs from its queue (queue mode) or from the store's
//! compile-job index (store-poll mode), re-synthesizes the structured input
//! to recover the parameter-type map, compiles with its target and inserts
//! a [`CompiledArtifact`] into the target's collection.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use difftest_types::{
    CompileFailure, CompileOutcome, CompiledArtifact, FunctionInputs, GenerationId, HarnessFailure,
};

use crate::ast::ContractDescription;
use crate::backend::{caller_deadline, Compiler};
use crate::metrics::PipelineMetrics;
use crate::process::TIMEOUT_ERROR_KIND;
use crate::queue::{Delivery, WorkQueue};
use crate::store::RecordStore;
use crate::synth::synthesize;

/// Where jobs come from.
#[derive(Clone)]
pub enum JobSource {
    Queue(Arc<dyn WorkQueue>),
    Store,
}

struct CompileJob {
    generation_id: GenerationId,
    source: String,
    inputs: Vec<FunctionInputs>,
    structured_input: String,
}

enum Receipt {
    Queue(Delivery),
    Store(GenerationId),
}

pub struct CompileWorker {
    target: String,
    collection: String,
    compiler: Arc<dyn Compiler>,
    store: Arc<dyn RecordStore>,
    jobs: JobSource,
    timeout: Duration,
    metrics: PipelineMetrics,
}

impl CompileWorker {
    /// `target` is the compiler target id; `collection` its artifact
    /// collection.
    pub fn new(
        target: impl Into<String>,
        collection: impl Into<String>,
        compiler: Arc<dyn Compiler>,
        store: Arc<dyn RecordStore>,
        jobs: JobSource,
        timeout: Duration,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            target: target.into(),
            collection: collection.into(),
            compiler,
            store,
            jobs,
            timeout,
            metrics,
        }
    }

    /// Drain every available job. Returns the number processed.
    pub async fn run_once(&self) -> Result<usize> {
        if let JobSource::Queue(queue) = &self.jobs {
            let recovered = queue.recover()?;
            if recovered > 0 {
                warn!(compiler = %self.target, recovered, "re-queued unacknowledged jobs");
            }
        }
        let mut processed = 0;
        while let Some((job, receipt)) = self.next_job()? {
            self.process(&job).await?;
            self.acknowledge(receipt)?;
            processed += 1;
        }
        Ok(processed)
    }

    pub async fn run(&self, interval: Duration) -> Result<()> {
        info!(compiler = %self.target, collection = %self.collection, "compile worker started");
        loop {
            let processed = self.run_once().await?;
            if processed > 0 {
                debug!(compiler = %self.target, processed, "compile cycle done");
            }
            tokio::time::sleep(interval).await;
        }
    }

    fn next_job(&self) -> Result<Option<(CompileJob, Receipt)>> {
        match &self.jobs {
            JobSource::Queue(queue) => Ok(queue.receive()?.map(|delivery| {
                let msg = &delivery.message;
                let job = CompileJob {
                    generation_id: msg.generation_id.clone(),
                    source: msg.source.clone(),
                    inputs: msg.generated_inputs.clone(),
                    structured_input: msg.structured_input_serialized.clone(),
                };
                (job, Receipt::Queue(delivery))
            })),
            JobSource::Store => {
                for id in self.store.pending_compiles(&self.target)? {
                    match self.store.get_generation(&id)? {
                        Some(record) => {
                            let job = CompileJob {
                                generation_id: record.id,
                                source: record.source,
                                inputs: record.inputs,
                                structured_input: record.structured_input,
                            };
                            return Ok(Some((job, Receipt::Store(id))));
                        }
                        None => {
                            warn!(compiler = %self.target, generation_id = %id, "compile job without generation record");
                            self.store.finish_compile(&self.target, &id)?;
                        }
                    }
                }
                Ok(None)
            }
        }
    }

    fn acknowledge(&self, receipt: Receipt) -> Result<()> {
        match (&self.jobs, receipt) {
            (JobSource::Queue(queue), Receipt::Queue(delivery)) => queue.ack(&delivery),
            (_, Receipt::Store(id)) => self.store.finish_compile(&self.target, &id),
            (JobSource::Store, Receipt::Queue(_)) => Ok(()),
        }
    }

    async fn process(&self, job: &CompileJob) -> Result<()> {
        let id = &job.generation_id;
        let desc = match ContractDescription::from_json(&job.structured_input) {
            Ok(desc) => desc,
            Err(e) => return self.record_defect(job, "MalformedStructuredInput", e.to_string()),
        };
        let synthesis = match synthesize(&desc) {
            Ok(synthesis) => synthesis,
            Err(e) => return self.record_defect(job, e.kind(), e.to_string()),
        };
        if synthesis.source != job.source {
            return self.record_defect(
                job,
                "SourceMismatch",
                "re-synthesized source differs from the stored source".to_string(),
            );
        }

        let deadline = caller_deadline(self.timeout);
        let outcome = match tokio::time::timeout(deadline, self.compiler.compile(&job.source)).await
        {
            Ok(outcome) => outcome?,
            Err(_) => CompileOutcome::Failure {
                error_type: TIMEOUT_ERROR_KIND.to_string(),
                error_message: format!("compile timed out after {:?}", self.timeout),
            },
        };

        match outcome {
            CompileOutcome::Success { bytecode, abi } => {
                let artifact = CompiledArtifact {
                    id: Uuid::new_v4().to_string(),
                    generation_id: id.clone(),
                    compiler: self.target.clone(),
                    bytecode,
                    abi,
                    type_map: synthesis.type_map,
                    inputs: job.inputs.clone(),
                    ran: false,
                    created_at: Utc::now(),
                };
                self.store.insert_artifact(&self.collection, &artifact)?;
                info!(compiler = %self.target, generation_id = %id, artifact_id = %artifact.id, "artifact stored");
            }
            CompileOutcome::Failure {
                error_type,
                error_message,
            } => {
                self.metrics.compile_failures.inc();
                info!(compiler = %self.target, generation_id = %id, %error_type, "compile failed");
                self.store.record_compile_failure(&CompileFailure {
                    generation_id: id.clone(),
                    compiler: self.target.clone(),
                    recorded_at: Utc::now(),
                    error_type,
                    error_message,
                })?;
            }
        }
        Ok(())
    }

    fn record_defect(&self, job: &CompileJob, kind: &str, message: String) -> Result<()> {
        error!(
            compiler = %self.target,
            generation_id = %job.generation_id,
            error_type = kind,
            "harness defect: {message}"
        );
        self.metrics.harness_defects.inc();
        self.store.record_harness_failure(&HarnessFailure {
            id: format!("{}_{}", job.generation_id, self.target),
            recorded_at: Utc::now(),
            error_type: kind.to_string(),
            error_message: message,
            structured_input: job.structured_input.clone(),
        })
    }
}
