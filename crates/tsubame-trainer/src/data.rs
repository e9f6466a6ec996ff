//! Data loading for pre-featurized sequences.
//!
//! One JSON object per line:
//!
//! ```text
//! {"tokens": ["Ada", "Lovelace"], "features": [[3, 17], [4, 17]], "labels": ["B-PER", "I-PER"]}
//! ```
//!
//! `labels` is omitted for inputs that are only decoded. Blank lines and
//! lines starting with `#` are ignored.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;
use tsubame_core::{LabeledSequence, TagSet, TokenSequence, TsubameError};

/// A single line of a dataset file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    #[serde(default)]
    pub tokens: Vec<String>,
    pub features: Vec<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

impl SequenceRecord {
    /// The unlabeled part of the record.
    pub fn input(&self) -> TokenSequence {
        TokenSequence::new(self.tokens.clone(), self.features.clone())
    }

    /// Encode labels with `tags`. Lengths are not checked here; the model
    /// reports a mismatch when the example is used.
    pub fn to_labeled(&self, tags: &TagSet) -> Result<LabeledSequence> {
        let names = self
            .labels
            .as_ref()
            .context("record has no labels")?;
        let labels = tags.encode(names)?;
        Ok(LabeledSequence::new(self.input(), labels))
    }
}

/// Read every record of a JSONL file.
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<SequenceRecord>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record: SequenceRecord = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: malformed record", path.display(), line_no + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Load a labeled dataset.
///
/// Records whose label names are not in `tags` are skipped with a warning;
/// records without labels are an error.
pub fn load_labeled_dataset<P: AsRef<Path>>(
    path: P,
    tags: &TagSet,
) -> Result<Vec<LabeledSequence>> {
    let path = path.as_ref();
    let mut examples = Vec::new();
    for (i, record) in read_records(path)?.iter().enumerate() {
        match record.to_labeled(tags) {
            Ok(example) => examples.push(example),
            Err(e) if matches!(
                e.downcast_ref::<TsubameError>(),
                Some(TsubameError::InvalidLabel(_))
            ) =>
            {
                warn!(path = %path.display(), record = i + 1, error = %e, "skipping record");
            }
            Err(e) => {
                return Err(e.context(format!("{}: record {}", path.display(), i + 1)));
            }
        }
    }
    Ok(examples)
}

/// Write records (e.g. with predicted labels) as JSONL.
pub fn write_records<P: AsRef<Path>>(path: P, records: &[SequenceRecord]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}
