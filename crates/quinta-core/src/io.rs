//! Line-delimited record files
//!
//! One JSON record per line, UTF-8. Blank lines are skipped on read.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::anyhow;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

/// Read every record of a line-delimited JSON file
pub fn read_jsonl<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .map_err(|e| anyhow!("{}:{}: {}", path.display(), line_no + 1, e))?;
        records.push(record);
    }

    tracing::debug!(path = %path.display(), records = records.len(), "Read records");
    Ok(records)
}

/// Write records as line-delimited JSON, creating parent directories
pub fn write_jsonl<T: Serialize>(path: impl AsRef<Path>, records: &[T]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    tracing::debug!(path = %path.display(), records = records.len(), "Wrote records");
    Ok(())
}
