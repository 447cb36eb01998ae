//! Row Reader — streams input records one at a time, tracking byte offsets.
//!
//! File sources are strict NDJSON: every non-blank line must be a JSON
//! object with a string `prompt`, and a violation aborts the run. Stdin and
//! other non-seekable sources are lenient: a line that is not such an object
//! becomes `{"prompt": <raw line>}`, so plain prompt-per-line piping works.
//!
//! The reader is consumed from a single coordinating path only; it is not
//! reentrant and workers never touch it.

use crate::error::{Error, Result};
use crate::extract::find_reserved_key;
use crate::types::{InputRecord, PROMPT_FIELD};
use serde_json::{Map, Value};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Streaming record reader over an NDJSON source.
pub struct RowReader {
    lines: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    /// File sources are strict; stdin falls back to raw-line prompts
    strict: bool,
    /// Check each row for reserved `tag:` keys as it is read (used when the
    /// source could not be pre-scanned)
    check_reserved: bool,
    bytes_read: u64,
    bytes_total: Option<u64>,
    line_number: u64,
    buf: String,
}

impl std::fmt::Debug for RowReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowReader")
            .field("strict", &self.strict)
            .field("check_reserved", &self.check_reserved)
            .field("bytes_read", &self.bytes_read)
            .field("bytes_total", &self.bytes_total)
            .field("line_number", &self.line_number)
            .finish_non_exhaustive()
    }
}

impl RowReader {
    /// Open a file source.
    ///
    /// When `extract_tags` is set, the whole file is pre-scanned for
    /// reserved-key collisions (and, as a consequence, for malformed rows)
    /// before the first record is handed out, so a violation yields zero
    /// output rows and zero provider requests.
    pub async fn file(path: &Path, extract_tags: bool) -> Result<Self> {
        if extract_tags {
            let file = File::open(path).await?;
            preflight_scan(BufReader::new(file)).await?;
        }

        let file = File::open(path).await?;
        let bytes_total = file.metadata().await?.len();
        Ok(Self {
            lines: BufReader::new(Box::new(file) as Box<dyn AsyncRead + Send + Unpin>),
            strict: true,
            // Collisions were already rejected by the pre-scan
            check_reserved: false,
            bytes_read: 0,
            bytes_total: Some(bytes_total),
            line_number: 0,
            buf: String::new(),
        })
    }

    /// Read records from standard input (lenient, unknown total length).
    pub fn stdin(extract_tags: bool) -> Self {
        Self::from_reader(Box::new(tokio::io::stdin()), extract_tags)
    }

    /// Read records from an arbitrary non-seekable reader (lenient).
    ///
    /// Reserved-key violations are detected on the first offending row,
    /// before that row is submitted.
    pub fn from_reader(reader: Box<dyn AsyncRead + Send + Unpin>, extract_tags: bool) -> Self {
        Self {
            lines: BufReader::new(reader),
            strict: false,
            check_reserved: extract_tags,
            bytes_read: 0,
            bytes_total: None,
            line_number: 0,
            buf: String::new(),
        }
    }

    /// Strict NDJSON over an arbitrary seekable-equivalent reader whose total
    /// length is known (test seam for file semantics).
    #[cfg(test)]
    pub(crate) fn strict_reader(
        reader: Box<dyn AsyncRead + Send + Unpin>,
        bytes_total: u64,
        check_reserved: bool,
    ) -> Self {
        Self {
            lines: BufReader::new(reader),
            strict: true,
            check_reserved,
            bytes_read: 0,
            bytes_total: Some(bytes_total),
            line_number: 0,
            buf: String::new(),
        }
    }

    /// Next record, or `None` at end of stream. Blank lines are skipped but
    /// still advance the byte offset.
    pub async fn next(&mut self) -> Result<Option<InputRecord>> {
        loop {
            self.buf.clear();
            let n = self.lines.read_line(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.bytes_read += n as u64;
            self.line_number += 1;

            let line = self.buf.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }

            let record = self.parse_line(line)?;
            if self.check_reserved
                && let Some(key) = find_reserved_key(record.fields())
            {
                return Err(Error::ReservedKeyCollision {
                    line_number: self.line_number,
                    key: key.to_string(),
                });
            }
            return Ok(Some(record));
        }
    }

    fn parse_line(&self, line: &str) -> Result<InputRecord> {
        let parsed: std::result::Result<Value, _> = serde_json::from_str(line);

        let fields = match parsed {
            Ok(Value::Object(map)) if map.get(PROMPT_FIELD).is_some_and(Value::is_string) => map,
            Ok(Value::Object(_)) if self.strict => {
                return Err(Error::MalformedRecord {
                    line_number: self.line_number,
                    message: format!("record is missing a string {PROMPT_FIELD:?} field"),
                });
            }
            Ok(_) if self.strict => {
                return Err(Error::MalformedRecord {
                    line_number: self.line_number,
                    message: "line is not a JSON object".to_string(),
                });
            }
            Err(e) if self.strict => {
                return Err(Error::MalformedRecord {
                    line_number: self.line_number,
                    message: format!("line is not valid JSON: {e}"),
                });
            }
            // Lenient sources: the raw line is the prompt
            _ => {
                let mut map = Map::new();
                map.insert(PROMPT_FIELD.to_string(), Value::String(line.to_string()));
                map
            }
        };

        Ok(InputRecord::new(fields, self.line_number))
    }

    /// Bytes consumed so far, including newlines.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Total source length, when the source is a seekable file.
    pub fn bytes_total(&self) -> Option<u64> {
        self.bytes_total
    }
}

/// Pre-flight scan of a full file source: every line must parse as a valid
/// record and no record may carry a reserved `tag:` key.
async fn preflight_scan<R: AsyncRead + Unpin>(mut reader: BufReader<R>) -> Result<()> {
    let mut buf = String::new();
    let mut line_number = 0u64;

    loop {
        buf.clear();
        if reader.read_line(&mut buf).await? == 0 {
            return Ok(());
        }
        line_number += 1;

        let line = buf.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }

        let value: Value =
            serde_json::from_str(line).map_err(|e| Error::MalformedRecord {
                line_number,
                message: format!("line is not valid JSON: {e}"),
            })?;
        let Value::Object(map) = value else {
            return Err(Error::MalformedRecord {
                line_number,
                message: "line is not a JSON object".to_string(),
            });
        };
        if !map.get(PROMPT_FIELD).is_some_and(Value::is_string) {
            return Err(Error::MalformedRecord {
                line_number,
                message: format!("record is missing a string {PROMPT_FIELD:?} field"),
            });
        }
        if let Some(key) = find_reserved_key(&map) {
            return Err(Error::ReservedKeyCollision {
                line_number,
                key: key.to_string(),
            });
        }
    }
}
