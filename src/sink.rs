//! Append-only destination for newline-delimited records.
//! Each call to `write_records` holds the lock for the whole block, so
//! records from concurrent clusters never interleave.

use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter, Stdout};
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("output io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not serialise output record: {0}")]
    Json(#[from] serde_json::Error),
}

pub enum OutputSink {
    Stdout(Mutex<Stdout>),
    File(Mutex<BufWriter<File>>),
    /// Keeps records in memory, one string per record
    Memory(Mutex<Vec<String>>),
}

impl OutputSink {
    pub fn stdout() -> Self {
        OutputSink::Stdout(Mutex::new(tokio::io::stdout()))
    }

    pub async fn file(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = File::create(path).await?;
        Ok(OutputSink::File(Mutex::new(BufWriter::new(file))))
    }

    pub fn memory() -> Self {
        OutputSink::Memory(Mutex::new(Vec::new()))
    }

    /// Serialise and append a block of records. Returns how many were written.
    pub async fn write_records<T: Serialize>(&self, records: &[T]) -> Result<usize, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }

        let lines = records
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<String>, _>>()?;

        match self {
            OutputSink::Stdout(out) => {
                let mut out = out.lock().await;
                out.write_all(join_lines(&lines).as_bytes()).await?;
                out.flush().await?;
            }
            OutputSink::File(out) => {
                let mut out = out.lock().await;
                out.write_all(join_lines(&lines).as_bytes()).await?;
            }
            OutputSink::Memory(out) => {
                out.lock().await.extend(lines);
            }
        }

        Ok(records.len())
    }

    pub async fn flush(&self) -> Result<(), SinkError> {
        match self {
            OutputSink::Stdout(out) => out.lock().await.flush().await?,
            OutputSink::File(out) => out.lock().await.flush().await?,
            OutputSink::Memory(_) => {}
        }
        Ok(())
    }

    /// Records held by a memory sink; other sinks keep nothing
    pub async fn records(&self) -> Vec<String> {
        match self {
            OutputSink::Memory(out) => out.lock().await.clone(),
            _ => Vec::new(),
        }
    }
}

fn join_lines(lines: &[String]) -> String {
    let mut block = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        block.push_str(line);
        block.push('\n');
    }
    block
}
