//! Template serving the configured data file.

use readthrough_cache::{MemoryTemplate, ReadError, Template, TemplateControls};
use readthrough_types::ReadRequest;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

/// In-memory rows answered after a fixed latency on the tokio runtime
#[derive(Debug)]
pub struct DelayedTemplate {
    rows: MemoryTemplate,
    latency: Duration,
    runtime: Handle,
}

impl DelayedTemplate {
    pub fn new(rows: MemoryTemplate, latency: Duration, runtime: Handle) -> Self {
        Self {
            rows,
            latency,
            runtime,
        }
    }
}

impl Template for DelayedTemplate {
    fn id_key(&self) -> &str {
        self.rows.id_key()
    }

    fn read(&self, request: ReadRequest, controls: TemplateControls) -> Result<(), ReadError> {
        let response = self.rows.respond(&request)?;
        if self.latency.is_zero() {
            controls.put(response);
            return Ok(());
        }

        let latency = self.latency;
        debug!(offset = request.offset, size = request.size, ?latency, "answering later");
        self.runtime.spawn(async move {
            tokio::time::sleep(latency).await;
            controls.put(response);
        });
        Ok(())
    }
}
