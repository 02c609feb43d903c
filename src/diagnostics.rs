// 🔍 File Diagnostics - Structure probe for problem inputs
// Read-only: answers "why does this file not load?" without touching the
// store. Column histogram + a cleaned sample of the first lines.

use crate::error::{IngestError, IngestResult};
use crate::normalize::clean_text;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// How many leading lines end up in the sample.
const SAMPLE_LINES: usize = 10;

/// How many leading bytes are shown raw.
const PREVIEW_BYTES: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinePreview {
    pub line: usize,
    pub columns: usize,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiagnosis {
    pub path: String,
    pub total_lines: usize,
    /// Column count → number of lines with that count.
    pub column_histogram: BTreeMap<usize, usize>,
    pub most_common_columns: Option<usize>,
    /// Lossy rendering of the first bytes, for spotting encoding damage.
    pub first_bytes: String,
    pub sample: Vec<LinePreview>,
}

/// Probe a delimited file: count lines, histogram the column widths, and
/// sample the first lines with diacritics/mojibake stripped for readability.
pub fn diagnose_file(path: &Path, delimiter: u8) -> IngestResult<FileDiagnosis> {
    if !path.exists() {
        return Err(IngestError::FileNotFound(path.display().to_string()));
    }

    let bytes = fs::read(path)?;
    let first_bytes =
        String::from_utf8_lossy(&bytes[..bytes.len().min(PREVIEW_BYTES)]).into_owned();

    // The histogram counts delimiter occurrences, not parsed fields, so it
    // also works on files no strategy can parse.
    let text = String::from_utf8_lossy(&bytes);
    let delimiter = delimiter as char;

    let mut total_lines = 0;
    let mut column_histogram: BTreeMap<usize, usize> = BTreeMap::new();
    let mut sample = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        total_lines += 1;
        let columns = line.matches(delimiter).count() + 1;
        *column_histogram.entry(columns).or_insert(0) += 1;

        if idx < SAMPLE_LINES {
            let mut preview = clean_text(line);
            if preview.chars().count() > 120 {
                preview = preview.chars().take(120).collect();
            }
            sample.push(LinePreview {
                line: idx + 1,
                columns,
                preview,
            });
        }
    }

    let most_common_columns = column_histogram
        .iter()
        .max_by_key(|(_, &count)| count)
        .map(|(&columns, _)| columns);

    Ok(FileDiagnosis {
        path: path.display().to_string(),
        total_lines,
        column_histogram,
        most_common_columns,
        first_bytes,
        sample,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_histogram_counts_column_widths() {
        let file = write_file("a;b;c\n1;2;3\n1;2\n1;2;3;4\n1;2;3\n");
        let diagnosis = diagnose_file(file.path(), b';').unwrap();

        assert_eq!(diagnosis.total_lines, 5);
        assert_eq!(diagnosis.column_histogram.get(&3), Some(&3));
        assert_eq!(diagnosis.column_histogram.get(&2), Some(&1));
        assert_eq!(diagnosis.column_histogram.get(&4), Some(&1));
        assert_eq!(diagnosis.most_common_columns, Some(3));
    }

    #[test]
    fn test_sample_is_capped_and_cleaned() {
        let mut content = String::from("póliza;descripción\n");
        for i in 0..20 {
            content.push_str(&format!("{};x\n", i));
        }
        let file = write_file(&content);

        let diagnosis = diagnose_file(file.path(), b';').unwrap();

        assert_eq!(diagnosis.sample.len(), 10);
        assert_eq!(diagnosis.sample[0].preview, "poliza;descripcion");
        assert_eq!(diagnosis.sample[0].line, 1);
        assert_eq!(diagnosis.total_lines, 21);
    }

    #[test]
    fn test_empty_file_diagnoses_cleanly() {
        let file = write_file("");
        let diagnosis = diagnose_file(file.path(), b';').unwrap();

        assert_eq!(diagnosis.total_lines, 0);
        assert!(diagnosis.column_histogram.is_empty());
        assert_eq!(diagnosis.most_common_columns, None);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = diagnose_file(Path::new("nope.csv"), b';');
        assert!(matches!(result, Err(IngestError::FileNotFound(_))));
    }
}
