//! Publisher that only logs payloads.

use async_trait::async_trait;

use super::{PublishError, Publisher};
use crate::aggregate::Batch;

/// Logs each payload instead of sending it anywhere.
#[derive(Debug, Default)]
pub struct LogPublisher {
    published: usize,
}

impl LogPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads logged so far.
    pub fn published(&self) -> usize {
        self.published
    }
}

#[async_trait]
impl Publisher for LogPublisher {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn publish(&mut self, batch: &Batch) -> Result<(), PublishError> {
        let payload = serde_json::to_string(batch)?;
        crate::log_event!("dry-run", "payload", "{payload}");
        self.published += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::OpenBatch;
    use crate::config::MatchMode;
    use crate::watcher::{Operation, RawEvent, WatchRegistry};

    #[tokio::test]
    async fn test_log_publisher_counts() {
        let registry =
            WatchRegistry::from_entries(vec![("movies", vec!["/m"])], MatchMode::Segment).unwrap();
        let batch = OpenBatch::new(&registry, RawEvent::new("/m/a", Operation::Create)).close();

        let mut publisher = LogPublisher::new();
        publisher.publish(&batch).await.unwrap();
        publisher.publish(&batch).await.unwrap();
        assert_eq!(publisher.published(), 2);
    }
}
