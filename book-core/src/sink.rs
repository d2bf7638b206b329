//! Destinations for emitted depth documents.

use crate::aggregator::EmittedDocument;
use crate::errors::SinkErrorKind;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Where [`crate::aggregator::Aggregator`] delivers each ~1Hz document.
pub trait Sink: Send + Sync {
    fn insert(&self, document: &EmittedDocument) -> Result<(), SinkErrorKind>;
}

/// Writes one JSON document per line to stdout. Useful for local runs and demos.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn insert(&self, document: &EmittedDocument) -> Result<(), SinkErrorKind> {
        let line = serde_json::to_string(document).map_err(|e| SinkErrorKind::Serialization {
            reason: e.to_string(),
        })?;
        println!("{line}");
        Ok(())
    }
}

/// Appends one JSON document per line to a file.
pub struct JsonLinesSink {
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkErrorKind> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SinkErrorKind::Unavailable {
                reason: e.to_string(),
            })?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl Sink for JsonLinesSink {
    fn insert(&self, document: &EmittedDocument) -> Result<(), SinkErrorKind> {
        let mut line = serde_json::to_string(document).map_err(|e| SinkErrorKind::Serialization {
            reason: e.to_string(),
        })?;
        line.push('\n');
        let mut file = self.file.lock().map_err(|_| SinkErrorKind::Unavailable {
            reason: "json lines sink mutex poisoned".to_string(),
        })?;
        file.write_all(line.as_bytes())
            .map_err(|e| SinkErrorKind::Unavailable {
                reason: e.to_string(),
            })
    }
}

/// Collects documents in memory. Used by tests and by callers embedding the
/// aggregator as a library rather than running the bundled binary.
#[derive(Debug, Default)]
pub struct InMemorySink {
    documents: Mutex<Vec<EmittedDocument>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> Vec<EmittedDocument> {
        self.documents.lock().expect("mutex poisoned").clone()
    }
}

impl Sink for InMemorySink {
    fn insert(&self, document: &EmittedDocument) -> Result<(), SinkErrorKind> {
        debug!(session = %document.m.s, "recording document in memory sink");
        self.documents
            .lock()
            .map_err(|_| SinkErrorKind::Unavailable {
                reason: "in-memory sink mutex poisoned".to_string(),
            })?
            .push(document.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::document::{BandMap, DocumentMeta, SessionRecord};
    use crate::orderbook::depth::SideBands;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sample_document() -> EmittedDocument {
        let mut cb = BTreeMap::new();
        cb.insert(
            "BTC".to_string(),
            SessionRecord {
                u: Utc::now(),
                b: None,
                a: None,
                bd: BandMap::bids(SideBands::default()),
                ad: BandMap::asks(SideBands::default()),
            },
        );
        let mut exchanges = BTreeMap::new();
        exchanges.insert("cb".to_string(), cb);

        EmittedDocument {
            m: DocumentMeta::new("a1b2c3"),
            t: Utc::now(),
            exchanges,
        }
    }

    #[test]
    fn in_memory_sink_records_inserted_documents() {
        let sink = InMemorySink::new();
        sink.insert(&sample_document()).unwrap();
        assert_eq!(sink.documents().len(), 1);
    }

    #[test]
    fn json_lines_sink_appends_one_line_per_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depth.jsonl");
        let sink = JsonLinesSink::open(&path).unwrap();
        sink.insert(&sample_document()).unwrap();
        sink.insert(&sample_document()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
