//! Generation stage: structured input to a stored, distributed record.
//!
//! Harness defects (synthesizer or input generator failures) are persisted
//! and returned as [`GenerationError::Harness`]; the driving fuzz engine
//! treats them as crashes. A compile failure of the synthesized source is a
//! normal outcome and is only recorded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use difftest_types::{
    CompileOutcome, FunctionInputs, GenerationId, GenerationRecord, HarnessFailure, InputStrategy,
};

use crate::ast::ContractDescription;
use crate::backend::{caller_deadline, Compiler};
use crate::distributor::{Distribution, WorkDistributor};
use crate::errors::HarnessError;
use crate::input_gen::InputGenerator;
use crate::metrics::PipelineMetrics;
use crate::process::TIMEOUT_ERROR_KIND;
use crate::store::RecordStore;
use crate::synth::{function_name, synthesize, Synthesis};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("harness defect: {0}")]
    Harness(#[from] HarnessError),
    #[error(transparent)]
    Pipeline(#[from] anyhow::Error),
}

/// What happened to one structured input.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub id: GenerationId,
    pub compiled: bool,
    pub distribution: Distribution,
}

pub struct GenerationStage {
    store: Arc<dyn RecordStore>,
    reference: Arc<dyn Compiler>,
    distributor: WorkDistributor,
    inputs: InputGenerator,
    strategies: Vec<InputStrategy>,
    generator_version: String,
    compile_timeout: Duration,
    metrics: PipelineMetrics,
}

impl GenerationStage {
    pub fn new(
        store: Arc<dyn RecordStore>,
        reference: Arc<dyn Compiler>,
        distributor: WorkDistributor,
        inputs: InputGenerator,
        strategies: Vec<InputStrategy>,
        generator_version: impl Into<String>,
        compile_timeout: Duration,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            store,
            reference,
            distributor,
            inputs,
            strategies,
            generator_version: generator_version.into(),
            compile_timeout,
            metrics,
        }
    }

    pub async fn process(
        &mut self,
        desc: &ContractDescription,
    ) -> Result<GenerationOutcome, GenerationError> {
        let id = Uuid::new_v4().to_string();
        let structured_input = desc.to_json().map_err(anyhow::Error::from)?;

        let (synthesis, inputs) = match self.synthesize_with_inputs(desc) {
            Ok(ok) => ok,
            Err(err) => {
                self.record_defect(&id, &structured_input, &err)?;
                return Err(err.into());
            }
        };
        debug!(generation_id = %id, order = ?synthesis.order, "synthesized");

        let compilation = self.compile(&synthesis.source).await?;
        let compiled = compilation.is_success();
        if let CompileOutcome::Failure { error_type, .. } = &compilation {
            self.metrics.compile_failures.inc();
            info!(generation_id = %id, compiler = self.reference.name(), %error_type, "reference compile failed");
        }

        let record = GenerationRecord {
            id: id.clone(),
            created_at: Utc::now(),
            structured_input,
            source_digest: hex::encode(Sha256::digest(synthesis.source.as_bytes())),
            source: synthesis.source,
            compilation,
            generator_version: self.generator_version.clone(),
            inputs,
        };
        self.store.insert_generation(&record)?;
        self.metrics.generations.inc();

        let distribution = self.distributor.distribute(&record)?;
        Ok(GenerationOutcome {
            id,
            compiled,
            distribution,
        })
    }

    fn synthesize_with_inputs(
        &mut self,
        desc: &ContractDescription,
    ) -> Result<(Synthesis, Vec<FunctionInputs>), HarnessError> {
        let synthesis = synthesize(desc)?;
        let names: Vec<String> = (0..desc.functions.len()).map(function_name).collect();
        let inputs =
            self.inputs
                .generate_for_contract(&synthesis.type_map, &names, &self.strategies)?;
        Ok((synthesis, inputs))
    }

    fn record_defect(
        &self,
        id: &str,
        structured_input: &str,
        err: &HarnessError,
    ) -> anyhow::Result<()> {
        error!(
            generation_id = %id,
            error_type = err.kind(),
            structured_input,
            "harness defect: {err}"
        );
        self.metrics.harness_defects.inc();
        self.store.record_harness_failure(&HarnessFailure {
            id: id.to_string(),
            recorded_at: Utc::now(),
            error_type: err.kind().to_string(),
            error_message: err.to_string(),
            structured_input: structured_input.to_string(),
        })
    }

    async fn compile(&self, source: &str) -> anyhow::Result<CompileOutcome> {
        let deadline = caller_deadline(self.compile_timeout);
        match tokio::time::timeout(deadline, self.reference.compile(source)).await {
            Ok(outcome) => outcome,
            Err(_) => Ok(CompileOutcome::Failure {
                error_type: TIMEOUT_ERROR_KIND.to_string(),
                error_message: format!("compile timed out after {:?}", self.compile_timeout),
            }),
        }
    }
}
