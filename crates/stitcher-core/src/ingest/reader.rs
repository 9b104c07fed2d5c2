//! Uniform "field name -> values" view over delimited and JSON-lines input.

use crate::error::{Result, StitchError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};

/// Input encoding of a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Header line followed by delimiter-separated rows.
    #[default]
    #[serde(alias = "csv", alias = "tsv")]
    Delimited,
    /// One JSON object per line.
    #[serde(alias = "jsonl", alias = "json")]
    JsonLines,
}

impl std::str::FromStr for SourceFormat {
    type Err = StitchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "delimited" | "csv" | "tsv" | "txt" => Ok(SourceFormat::Delimited),
            "jsonlines" | "jsonl" | "json" | "ndjson" => Ok(SourceFormat::JsonLines),
            other => Err(StitchError::Validation(format!("Unknown source format: {}", other))),
        }
    }
}

/// One input record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Zero-based position among the records of the source.
    pub ordinal: u64,
    /// Non-empty values per field. Multi-valued JSON fields keep each element.
    pub fields: BTreeMap<String, Vec<String>>,
    /// Source text of the record.
    pub raw: String,
    /// Why the record could not be read as fields, if it could not.
    pub malformed: Option<String>,
}

impl Record {
    pub fn is_malformed(&self) -> bool {
        self.malformed.is_some()
    }

    /// First value of a field.
    pub fn first(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.first()).map(|s| s.as_str())
    }
}

enum Inner<R: Read> {
    Delimited {
        records: csv::StringRecordsIntoIter<R>,
        headers: Vec<String>,
        delimiter: char,
    },
    JsonLines {
        reader: BufReader<R>,
    },
}

/// Streaming record iterator. Malformed records are yielded, flagged, so
/// callers can keep ordinals aligned; only I/O failures end iteration with
/// an error.
pub struct RecordReader<R: Read> {
    inner: Inner<R>,
    next_ordinal: u64,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R, format: SourceFormat, delimiter: u8) -> Result<Self> {
        let inner = match format {
            SourceFormat::Delimited => {
                let mut rdr = csv::ReaderBuilder::new()
                    .delimiter(delimiter)
                    .flexible(true)
                    .has_headers(true)
                    .from_reader(reader);
                let headers = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
                Inner::Delimited {
                    records: rdr.into_records(),
                    headers,
                    delimiter: delimiter as char,
                }
            }
            SourceFormat::JsonLines => Inner::JsonLines {
                reader: BufReader::new(reader),
            },
        };
        Ok(Self {
            inner,
            next_ordinal: 0,
        })
    }

    fn emit(&mut self, fields: BTreeMap<String, Vec<String>>, raw: String, malformed: Option<String>) -> Record {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        Record {
            ordinal,
            fields,
            raw,
            malformed,
        }
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            Inner::Delimited {
                records,
                headers,
                delimiter,
            } => {
                let row = match records.next()? {
                    Ok(row) => row,
                    Err(e) if e.is_io_error() => return Some(Err(e.into())),
                    Err(e) => {
                        let reason = e.to_string();
                        return Some(Ok(self.emit(BTreeMap::new(), String::new(), Some(reason))));
                    }
                };

                let raw = row.iter().collect::<Vec<_>>().join(&delimiter.to_string());
                if row.len() != headers.len() {
                    let reason = format!("expected {} fields, found {}", headers.len(), row.len());
                    return Some(Ok(self.emit(BTreeMap::new(), raw, Some(reason))));
                }

                let mut fields = BTreeMap::new();
                for (name, value) in headers.iter().zip(row.iter()) {
                    let value = value.trim();
                    if !value.is_empty() {
                        fields
                            .entry(name.clone())
                            .or_insert_with(Vec::new)
                            .push(value.to_string());
                    }
                }
                Some(Ok(self.emit(fields, raw, None)))
            }
            Inner::JsonLines { reader } => loop {
                // Bytes, not `lines()`: a line that is not UTF-8 is a bad
                // record, not a failed read.
                let mut bytes = Vec::new();
                match reader.read_until(b'\n', &mut bytes) {
                    Ok(0) => return None,
                    Ok(_) => {}
                    Err(e) => return Some(Err(e.into())),
                }
                if bytes.ends_with(b"\n") {
                    bytes.pop();
                    if bytes.ends_with(b"\r") {
                        bytes.pop();
                    }
                }

                let line = match String::from_utf8(bytes) {
                    Ok(line) => line,
                    Err(e) => {
                        let reason = format!("invalid UTF-8: {}", e.utf8_error());
                        let raw = String::from_utf8_lossy(e.as_bytes()).into_owned();
                        return Some(Ok(self.emit(BTreeMap::new(), raw, Some(reason))));
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let record = match json_fields(&line) {
                    Ok(fields) => self.emit(fields, line, None),
                    Err(reason) => self.emit(BTreeMap::new(), line, Some(reason)),
                };
                return Some(Ok(record));
            },
        }
    }
}

fn json_fields(line: &str) -> std::result::Result<BTreeMap<String, Vec<String>>, String> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let serde_json::Value::Object(map) = value else {
        return Err("record is not a JSON object".to_string());
    };

    let mut fields = BTreeMap::new();
    for (name, value) in map {
        let values: Vec<String> = match value {
            serde_json::Value::Array(items) => items.iter().filter_map(json_scalar).collect(),
            other => json_scalar(&other).into_iter().collect(),
        };
        if !values.is_empty() {
            fields.insert(name, values);
        }
    }
    Ok(fields)
}

fn json_scalar(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::Null => return None,
        serde_json::Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(input: &str, format: SourceFormat, delimiter: u8) -> Vec<Record> {
        RecordReader::new(input.as_bytes(), format, delimiter)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_delimited_rows() {
        let records = read_all("id,name,cas\n1,Aspirin,50-78-2\n2,,\n", SourceFormat::Delimited, b',');
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].first("name"), Some("Aspirin"));
        assert_eq!(records[0].raw, "1,Aspirin,50-78-2");
        assert_eq!(records[1].fields.len(), 1);
        assert_eq!(records[1].ordinal, 1);
    }

    #[test]
    fn test_field_count_mismatch_is_flagged() {
        let records = read_all("a\tb\n1\t2\n1\t2\t3\n4\t5\n", SourceFormat::Delimited, b'\t');
        assert_eq!(records.len(), 3);
        assert!(records[1].is_malformed());
        assert!(records[1].fields.is_empty());
        assert!(!records[2].is_malformed());
        assert_eq!(records[2].ordinal, 2);
    }

    #[test]
    fn test_json_lines() {
        let input = "{\"id\": 7, \"names\": [\"a\", \"b\", null], \"x\": null}\n\n[1,2]\nnot json\n";
        let records = read_all(input, SourceFormat::JsonLines, b',');
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].first("id"), Some("7"));
        assert_eq!(records[0].fields["names"], vec!["a", "b"]);
        assert!(!records[0].fields.contains_key("x"));
        assert!(records[1].is_malformed());
        assert!(records[2].is_malformed());
        assert_eq!(records[2].ordinal, 2);
    }

    #[test]
    fn test_json_line_with_invalid_utf8_is_flagged() {
        let input: &[u8] = b"{\"id\": 1}\r\n{\"id\": \"\xff\xfe\"}\n{\"id\": 3}";
        let records = RecordReader::new(input, SourceFormat::JsonLines, b',')
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].first("id"), Some("1"));
        assert!(records[1].is_malformed());
        assert!(records[1].malformed.as_deref().unwrap().contains("UTF-8"));
        assert_eq!(records[2].first("id"), Some("3"));
        assert_eq!(records[2].ordinal, 2);
    }

    #[test]
    fn test_format_names() {
        assert_eq!("csv".parse::<SourceFormat>().unwrap(), SourceFormat::Delimited);
        assert_eq!("JSONL".parse::<SourceFormat>().unwrap(), SourceFormat::JsonLines);
        assert!("xml".parse::<SourceFormat>().is_err());
    }
}
