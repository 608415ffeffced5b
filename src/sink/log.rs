use async_trait::async_trait;

use crate::handlers::context::EventSink;
use crate::records::Emission;

/// Writes each record as a structured log line. Used for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn emit(&self, event: Emission) {
        match event.attributes() {
            Ok(attributes) => {
                tracing::info!(
                    target: "usr_events",
                    event = event.name(),
                    attributes = %attributes,
                    "emit"
                );
            }
            Err(e) => {
                tracing::error!(event = event.name(), error = %e, "Failed to serialize record");
            }
        }
    }
}
