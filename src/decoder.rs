// 📂 Row Decoder - Fault-tolerant reader for delimited declaration files
// Ordered fallback: Strict → Lenient → LineRepair, cycled over an encoding
// ladder (UTF-8 → Latin-1 → Windows-1252 → ISO-8859-1). First strategy that
// produces at least one row wins; partial results are never merged.

use crate::error::{IngestError, IngestResult};
use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

// ============================================================================
// STRATEGIES & ENCODINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeStrategy {
    /// Full quote handling; rows with the wrong field count are dropped.
    Strict,

    /// Whitespace trimmed, quotes treated as literal text.
    Lenient,

    /// Per-line repair: excess trailing fields merged into the last column,
    /// short rows padded with empty strings.
    LineRepair,
}

impl DecodeStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            DecodeStrategy::Strict => "strict",
            DecodeStrategy::Lenient => "lenient",
            DecodeStrategy::LineRepair => "line-repair",
        }
    }
}

const STRATEGY_ORDER: [DecodeStrategy; 3] = [
    DecodeStrategy::Strict,
    DecodeStrategy::Lenient,
    DecodeStrategy::LineRepair,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceEncoding {
    Utf8,
    Latin1,
    Windows1252,
    Iso8859_1,
}

impl SourceEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            SourceEncoding::Utf8 => "utf-8",
            SourceEncoding::Latin1 => "latin-1",
            SourceEncoding::Windows1252 => "windows-1252",
            SourceEncoding::Iso8859_1 => "iso-8859-1",
        }
    }

    /// Decode strictly: `None` means the bytes are not valid in this encoding.
    fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            SourceEncoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_string),
            // Latin-1 maps every byte to the code point of the same value.
            SourceEncoding::Latin1 | SourceEncoding::Iso8859_1 => {
                Some(bytes.iter().map(|&b| b as char).collect())
            }
            SourceEncoding::Windows1252 => encoding_rs::WINDOWS_1252
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|text| text.into_owned()),
        }
    }
}

const ENCODING_ORDER: [SourceEncoding; 4] = [
    SourceEncoding::Utf8,
    SourceEncoding::Latin1,
    SourceEncoding::Windows1252,
    SourceEncoding::Iso8859_1,
];

// ============================================================================
// DECODED OUTPUT
// ============================================================================

/// One data row: the raw field values in header order plus the 1-based line
/// number in the source file, kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRow {
    pub line: usize,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedLine {
    pub line: usize,
    pub reason: String,
}

/// What the decoder did to get its rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeReport {
    pub strategy: DecodeStrategy,
    pub encoding: SourceEncoding,
    pub rows_decoded: usize,
    /// Non-blank lines after the header, before any dropping.
    pub data_lines: usize,
    pub dropped: Vec<DroppedLine>,
    pub repaired: Vec<usize>,
}

/// A decoded file: the header resolved once, rows indexed through it.
#[derive(Debug, Clone)]
pub struct DecodedFile {
    pub columns: Vec<String>,
    index: HashMap<String, usize>,
    pub rows: Vec<RawRow>,
    pub report: DecodeReport,
}

impl DecodedFile {
    fn new(outcome: StrategyOutcome, strategy: DecodeStrategy, encoding: SourceEncoding) -> Self {
        let index = outcome
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let report = DecodeReport {
            strategy,
            encoding,
            rows_decoded: outcome.rows.len(),
            data_lines: outcome.data_lines,
            dropped: outcome.dropped,
            repaired: outcome.repaired,
        };

        DecodedFile {
            columns: outcome.columns,
            index,
            rows: outcome.rows,
            report,
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Raw value of `column` in `row`, if the column exists.
    pub fn value<'a>(&self, row: &'a RawRow, column: &str) -> Option<&'a str> {
        self.index
            .get(column)
            .and_then(|&i| row.values.get(i))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Intermediate result of one strategy pass.
struct StrategyOutcome {
    columns: Vec<String>,
    rows: Vec<RawRow>,
    data_lines: usize,
    dropped: Vec<DroppedLine>,
    repaired: Vec<usize>,
}

// ============================================================================
// ROW DECODER
// ============================================================================

pub struct RowDecoder {
    delimiter: u8,
}

impl Default for RowDecoder {
    fn default() -> Self {
        RowDecoder { delimiter: b';' }
    }
}

impl RowDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn decode_path(&self, path: &Path) -> IngestResult<DecodedFile> {
        if !path.exists() {
            return Err(IngestError::FileNotFound(path.display().to_string()));
        }
        let bytes = fs::read(path)?;
        self.decode_bytes(&bytes)
    }

    /// Run the strategy/encoding ladder over a byte stream.
    ///
    /// Empty and header-only inputs decode to zero rows successfully. A
    /// stream with data lines that defeats every strategy, or one that is
    /// not text under any encoding, is `IngestError::Unreadable`.
    pub fn decode_bytes(&self, bytes: &[u8]) -> IngestResult<DecodedFile> {
        // A NUL byte never appears in delimited text under any of the
        // supported encodings; the stream is binary.
        if bytes.contains(&0) {
            warn!("input contains NUL bytes, treating as binary");
            return Err(IngestError::Unreadable {
                attempts: ENCODING_ORDER.iter().map(|e| e.name().to_string()).collect(),
            });
        }

        let mut attempts = Vec::new();
        let mut fallback: Option<(SourceEncoding, StrategyOutcome)> = None;

        for encoding in ENCODING_ORDER {
            let Some(text) = encoding.decode(bytes) else {
                attempts.push(format!("{} (undecodable)", encoding.name()));
                continue;
            };

            for strategy in STRATEGY_ORDER {
                let outcome = self.run_strategy(strategy, &text);

                if !outcome.rows.is_empty() {
                    info!(
                        strategy = strategy.name(),
                        encoding = encoding.name(),
                        rows = outcome.rows.len(),
                        dropped = outcome.dropped.len(),
                        repaired = outcome.repaired.len(),
                        "decode succeeded"
                    );
                    return Ok(DecodedFile::new(outcome, strategy, encoding));
                }

                debug!(
                    strategy = strategy.name(),
                    encoding = encoding.name(),
                    "strategy produced no rows"
                );
                attempts.push(format!("{} + {}", encoding.name(), strategy.name()));

                if fallback.is_none() {
                    fallback = Some((encoding, outcome));
                }
            }
        }

        // Zero rows everywhere. An empty or header-only file is a legitimate
        // zero-row result; anything with data lines is unreadable.
        if let Some((encoding, outcome)) = fallback {
            if outcome.data_lines == 0 {
                return Ok(DecodedFile::new(outcome, DecodeStrategy::Strict, encoding));
            }
        }

        Err(IngestError::Unreadable { attempts })
    }

    fn run_strategy(&self, strategy: DecodeStrategy, text: &str) -> StrategyOutcome {
        match strategy {
            DecodeStrategy::Strict => self.parse_with_reader(text, false),
            DecodeStrategy::Lenient => self.parse_with_reader(text, true),
            DecodeStrategy::LineRepair => self.parse_line_repair(text),
        }
    }

    /// Strict and Lenient share the csv reader; Lenient trims whitespace and
    /// turns quote handling off so unbalanced quotes stay literal.
    fn parse_with_reader(&self, text: &str, lenient: bool) -> StrategyOutcome {
        let mut builder = ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true);
        if lenient {
            builder.trim(Trim::All).quoting(false);
        }
        let mut reader = builder.from_reader(text.as_bytes());

        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::new();
        let mut data_lines = 0;
        let mut dropped = Vec::new();

        for (idx, result) in reader.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(err) => {
                    dropped.push(DroppedLine {
                        line: idx + 1,
                        reason: format!("parse error: {}", err),
                    });
                    continue;
                }
            };

            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(idx + 1);

            if idx == 0 {
                columns = record.iter().map(|h| h.trim().to_string()).collect();
                continue;
            }

            // Completely blank rows carry no information at all.
            if record.iter().all(|v| v.trim().is_empty()) {
                continue;
            }
            data_lines += 1;

            if record.len() == columns.len() {
                rows.push(RawRow {
                    line,
                    values: record.iter().map(str::to_string).collect(),
                });
            } else {
                dropped.push(DroppedLine {
                    line,
                    reason: format!(
                        "expected {} fields, found {}",
                        columns.len(),
                        record.len()
                    ),
                });
            }
        }

        StrategyOutcome {
            columns,
            rows,
            data_lines,
            dropped,
            repaired: Vec::new(),
        }
    }

    /// Line-by-line repair pass. The delimiter inside free text is the usual
    /// culprit for overlong rows, so the excess trailing fields are re-joined
    /// into the last column; short rows are padded with empty strings.
    fn parse_line_repair(&self, text: &str) -> StrategyOutcome {
        let delimiter = self.delimiter as char;
        let separator = delimiter.to_string();

        let mut lines = text.lines().enumerate();

        let columns: Vec<String> = match lines.next() {
            Some((_, header)) => header
                .split(delimiter)
                .map(|h| h.trim().to_string())
                .collect(),
            None => Vec::new(),
        };
        let expected = columns.len();

        let mut rows = Vec::new();
        let mut data_lines = 0;
        let mut repaired = Vec::new();

        for (idx, raw_line) in lines {
            let line = idx + 1;
            if raw_line.trim().is_empty() {
                continue;
            }
            data_lines += 1;

            let mut values: Vec<String> =
                raw_line.split(delimiter).map(str::to_string).collect();

            if values.len() > expected {
                // Re-join the overflow into the final column.
                let tail = values.split_off(expected - 1).join(&separator);
                values.push(tail);
                repaired.push(line);
            } else if values.len() < expected {
                values.resize(expected, String::new());
                repaired.push(line);
            }

            rows.push(RawRow { line, values });
        }

        StrategyOutcome {
            columns,
            rows,
            data_lines,
            dropped: Vec::new(),
            repaired,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
