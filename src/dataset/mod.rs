//! Utterance dataset export
//!
//! The dataset-creation collaborator: buffers one sentence per (agent,
//! timestep, batch row) during an episode and flushes them to a tabular
//! file afterward. Never constructed outside dataset-creation mode.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Buffered writer for per-timestep utterance strings
#[derive(Debug, Default)]
pub struct UtteranceDatasetWriter {
    sentences: BTreeMap<(i64, i64), Vec<String>>,
}

impl UtteranceDatasetWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer one agent's sentences for one timestep, one per batch row
    pub fn record(&mut self, agent: i64, timestep: i64, rows: &[String]) {
        self.sentences.insert((agent, timestep), rows.to_vec());
    }

    /// Number of buffered (agent, timestep) cells
    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    /// True when nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// Flush everything recorded to a CSV file
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut csv = String::from("agent,timestep,row,sentence\n");
        for ((agent, timestep), rows) in &self.sentences {
            for (row, sentence) in rows.iter().enumerate() {
                csv.push_str(&format!("{},{},{},{}\n", agent, timestep, row, sentence));
            }
        }
        fs::write(path.as_ref(), csv)
            .with_context(|| format!("writing utterance dataset to {:?}", path.as_ref()))?;
        tracing::info!("wrote utterance dataset to {:?}", path.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_write() {
        let mut writer = UtteranceDatasetWriter::new();
        writer.record(0, 0, &["goto red".to_string(), "goto blue".to_string()]);
        writer.record(1, 0, &["stay".to_string(), "stay".to_string()]);
        assert_eq!(writer.len(), 2);

        let path = std::env::temp_dir().join("parley_test_dataset.csv");
        writer.write(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("agent,timestep,row,sentence\n"));
        assert!(contents.contains("0,0,1,goto blue"));
        assert!(contents.contains("1,0,0,stay"));

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_rerecording_replaces() {
        let mut writer = UtteranceDatasetWriter::new();
        writer.record(0, 3, &["first".to_string()]);
        writer.record(0, 3, &["second".to_string()]);
        assert_eq!(writer.len(), 1);
    }
}
