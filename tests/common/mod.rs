#![allow(dead_code)]

pub mod strategies;

use async_trait::async_trait;
use conductor_core::{PipelineHandler, PipelineRequest};
use parking_lot::Mutex;

/// Records the request ids it ran, in order; fails any pipeline named "broken"
#[derive(Debug, Default)]
pub struct RecordingHandler {
    executed: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl PipelineHandler for RecordingHandler {
    async fn execute(&self, request: &mut PipelineRequest) -> anyhow::Result<()> {
        self.executed.lock().push(request.request_id.clone());
        tokio::task::yield_now().await;
        if request.pipeline_name == "broken" {
            anyhow::bail!("pipeline {} is broken", request.request_id);
        }
        Ok(())
    }
}
