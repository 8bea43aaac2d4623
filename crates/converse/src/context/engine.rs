use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::state::PipelineState;

/// One stage of the context pipeline. Takes the state by value and hands it back.
#[async_trait]
pub trait ContextProcessor: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, state: PipelineState) -> Result<PipelineState>;
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Processor [{processor}] execution failed")]
    ProcessorFailed {
        processor: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn processor(&self) -> &str {
        match self {
            PipelineError::ProcessorFailed { processor, .. } => processor,
        }
    }
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub state: PipelineState,
    pub processed_count: usize,
    pub total_duration: Duration,
}

impl PipelineOutcome {
    pub fn aborted(&self) -> bool {
        self.state.is_aborted()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub processor_count: usize,
    pub processor_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// An ordered chain of processors
#[derive(Clone, Default)]
pub struct ContextEngine {
    processors: Vec<Arc<dyn ContextProcessor>>,
}

impl ContextEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_processors(processors: Vec<Arc<dyn ContextProcessor>>) -> Self {
        ContextEngine { processors }
    }

    pub fn add_processor(&mut self, processor: Arc<dyn ContextProcessor>) -> &mut Self {
        self.processors.push(processor);
        self
    }

    /// Remove every processor called `name`, returning whether any was removed
    pub fn remove_processor(&mut self, name: &str) -> bool {
        let before = self.processors.len();
        self.processors.retain(|p| p.name() != name);
        self.processors.len() != before
    }

    pub fn clear(&mut self) {
        self.processors.clear();
    }

    pub fn processors(&self) -> Vec<Arc<dyn ContextProcessor>> {
        self.processors.clone()
    }

    pub fn processor_names(&self) -> Vec<String> {
        self.processors.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            processor_count: self.processors.len(),
            processor_names: self.processor_names(),
        }
    }

    pub fn validate(&self) -> Validation {
        let mut errors = Vec::new();
        if self.processors.is_empty() {
            errors.push("No processors in pipeline".to_string());
        }

        let names = self.processor_names();
        if names.iter().any(|n| n.is_empty()) {
            errors.push("Processor missing name".to_string());
        }

        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for name in names.iter().filter(|n| !n.is_empty()) {
            if !seen.insert(name) && !duplicates.contains(name) {
                duplicates.push(name.clone());
            }
        }
        if !duplicates.is_empty() {
            errors.push(format!(
                "Found duplicate processor names: {}",
                duplicates.join(", ")
            ));
        }

        Validation {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub async fn process(&self, initial: PipelineState) -> Result<PipelineOutcome, PipelineError> {
        let started = Instant::now();
        let mut state = initial;
        let mut processed_count = 0;

        for processor in &self.processors {
            let stage_started = Instant::now();
            state = processor
                .process(state)
                .await
                .map_err(|source| PipelineError::ProcessorFailed {
                    processor: processor.name().to_string(),
                    source,
                })?;
            processed_count += 1;

            tracing::debug!(
                processor = processor.name(),
                messages = state.messages.len(),
                elapsed_us = stage_started.elapsed().as_micros() as u64,
                "context processor finished"
            );

            if let Some(reason) = state.abort_reason() {
                tracing::debug!(processor = processor.name(), reason, "context pipeline aborted");
                break;
            }
        }

        Ok(PipelineOutcome {
            state,
            processed_count,
            total_duration: started.elapsed(),
        })
    }
}
