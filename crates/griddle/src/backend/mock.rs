use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use crate::communication::Request;
use crate::error::BackendError;
use super::{Backend, ItemOutcome};

/// Test backend that records every batch it is handed.
///
/// Prompt conventions:
/// * `fail*` - that item errors
/// * `boom*` - the whole call errors
/// * `panic*` - the whole call panics
/// * anything else - `out:<prompt>`
#[derive(Clone, Default)]
pub(crate) struct MockBackend {
    batches: Arc<Mutex<Vec<Vec<String>>>>,
    delay: Duration,
    short_by: usize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns this many fewer outcomes than inputs.
    pub fn short_by(mut self, missing: usize) -> Self {
        self.short_by = missing;
        self
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.batches().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl Backend for MockBackend {
    type Output = String;

    async fn invoke_batch(&self, batch: &[Request]) -> Result<Vec<ItemOutcome<String>>, BackendError> {
        let prompts: Vec<String> = batch.iter().map(|r| r.payload().to_string()).collect();
        self.batches.lock().unwrap().push(prompts.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if prompts.iter().any(|p| p.starts_with("boom")) {
            return Err(BackendError::new("batch call failed"));
        }
        if prompts.iter().any(|p| p.starts_with("panic")) {
            panic!("backend exploded");
        }

        let keep = prompts.len().saturating_sub(self.short_by);
        Ok(prompts
            .into_iter()
            .take(keep)
            .map(|p| {
                if p.starts_with("fail") {
                    Err(BackendError::new(format!("bad prompt: {p}")))
                } else {
                    Ok(format!("out:{p}"))
                }
            })
            .collect())
    }
}
