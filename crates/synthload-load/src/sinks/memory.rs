use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use synthload_core::SyntheticRecord;

use crate::sink::{Sink, SinkConnection, SinkError};

/// Sink keeping committed rows in memory. Used for dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    committed: Arc<Mutex<Vec<SyntheticRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every committed row, in commit order.
    pub fn committed(&self) -> Vec<SyntheticRecord> {
        self.committed
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.committed.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn engine(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<Box<dyn SinkConnection>, SinkError> {
        Ok(Box::new(MemoryConnection {
            committed: Arc::clone(&self.committed),
            pending: None,
        }))
    }
}

struct MemoryConnection {
    committed: Arc<Mutex<Vec<SyntheticRecord>>>,
    pending: Option<Vec<SyntheticRecord>>,
}

impl MemoryConnection {
    fn pending(&mut self) -> Result<&mut Vec<SyntheticRecord>, SinkError> {
        self.pending
            .as_mut()
            .ok_or_else(|| SinkError::Statement("no transaction in progress".to_string()))
    }
}

#[async_trait]
impl SinkConnection for MemoryConnection {
    async fn begin(&mut self) -> Result<(), SinkError> {
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn insert(&mut self, record: &SyntheticRecord) -> Result<(), SinkError> {
        self.pending()?.push(record.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SinkError> {
        let rows = self
            .pending
            .take()
            .ok_or_else(|| SinkError::Statement("no transaction in progress".to_string()))?;
        let mut committed = self
            .committed
            .lock()
            .map_err(|_| SinkError::Statement("memory sink lock poisoned".to_string()))?;
        committed.extend(rows);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SinkError> {
        self.pending = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.pending = None;
        Ok(())
    }
}
