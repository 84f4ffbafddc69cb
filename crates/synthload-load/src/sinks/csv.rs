use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use synthload_core::{RECORD_COLUMNS, SyntheticRecord};

use crate::sink::{Sink, SinkConnection, SinkError};

/// Sink appending committed batches to a CSV file.
///
/// A transaction buffers rows in memory. Commit encodes the whole batch,
/// appends it with one write and syncs the file; if any step of the append
/// fails the file is truncated back to its length before the commit. The
/// header row is written when the file is empty.
///
/// Commit does blocking file I/O on the calling task and never yields, so
/// the loader's statement timeout cannot fire in the middle of an append.
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for CsvSink {
    fn engine(&self) -> &'static str {
        "csv"
    }

    async fn connect(&self) -> Result<Box<dyn SinkConnection>, SinkError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Box::new(CsvConnection {
            path: self.path.clone(),
            pending: None,
        }))
    }
}

struct CsvConnection {
    path: PathBuf,
    pending: Option<Vec<[String; 9]>>,
}

#[async_trait]
impl SinkConnection for CsvConnection {
    async fn begin(&mut self) -> Result<(), SinkError> {
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn insert(&mut self, record: &SyntheticRecord) -> Result<(), SinkError> {
        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| SinkError::Statement("no transaction in progress".to_string()))?;
        pending.push(record.to_row());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SinkError> {
        let rows = self
            .pending
            .take()
            .ok_or_else(|| SinkError::Statement("no transaction in progress".to_string()))?;
        append_rows(&self.path, &rows)
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

fn append_rows(path: &Path, rows: &[[String; 9]]) -> Result<(), SinkError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let encoded = encode_rows(rows, file.metadata()?.len() == 0)?;
    append_or_rewind(&mut file, &encoded)
}

fn encode_rows(rows: &[[String; 9]], with_header: bool) -> Result<Vec<u8>, SinkError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    if with_header {
        writer.write_record(RECORD_COLUMNS)?;
    }
    for row in rows {
        writer.write_record(row)?;
    }
    writer
        .into_inner()
        .map_err(|err| SinkError::Io(err.into_error()))
}

/// Destination of an encoded batch.
trait AppendTarget: Write {
    fn current_len(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl AppendTarget for File {
    fn current_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Append `bytes` in full or leave `target` at its previous length.
fn append_or_rewind<T: AppendTarget>(target: &mut T, bytes: &[u8]) -> Result<(), SinkError> {
    let original_len = target.current_len()?;
    let appended = target
        .write_all(bytes)
        .and_then(|()| target.flush())
        .and_then(|()| target.sync());

    if let Err(err) = appended {
        if let Err(truncate_err) = target.truncate_to(original_len) {
            warn!(
                error = %truncate_err,
                original_len,
                "failed to truncate partial csv append"
            );
        }
        return Err(SinkError::Io(err));
    }
    Ok(())
}
