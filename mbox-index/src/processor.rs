//! Per-message processing callback
//!
//! Workers call a [`MessageProcessor`] once per item with the raw record and
//! its metadata. The processor returns the outputs to persist; the engine
//! never interprets message structure itself.

use crate::distributor::WorkItem;
use crate::reader::RawMessage;
use crate::writer::RowRecord;
use mail_parser::MessageParser;
use serde::Serialize;

/// A file to write, keyed by its path relative to the output root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutput {
    pub key: String,
    pub content: Vec<u8>,
}

/// A row to insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOutput {
    pub key: String,
    pub record: RowRecord,
}

/// Everything one item produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemOutput {
    pub files: Vec<FileOutput>,
    pub rows: Vec<RowOutput>,
}

impl ItemOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, key: impl Into<String>, content: Vec<u8>) -> Self {
        self.files.push(FileOutput {
            key: key.into(),
            content,
        });
        self
    }

    pub fn with_row(mut self, key: impl Into<String>, record: RowRecord) -> Self {
        self.rows.push(RowOutput {
            key: key.into(),
            record,
        });
        self
    }
}

/// Caller-supplied work done for every item
///
/// Runs on blocking worker threads; an error or panic fails that item only.
pub trait MessageProcessor: Send + Sync + 'static {
    fn process(&self, message: &RawMessage<'_>, item: &WorkItem) -> anyhow::Result<ItemOutput>;

    fn name(&self) -> &str {
        "processor"
    }
}

/// Exports each message as `<group>/<id>.eml` plus a summary row
#[derive(Debug, Clone, Default)]
pub struct EmlExportProcessor;

#[derive(Debug, Serialize)]
struct MessageSummary<'a> {
    id: u32,
    file: &'a str,
    subject: Option<String>,
    from: Option<String>,
    date: Option<String>,
    grouping_key: Option<&'a str>,
    secondary_key: Option<&'a str>,
    bytes: u32,
}

impl EmlExportProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Directory name for a grouping key, safe as a single path component
    fn group_dir(item: &WorkItem) -> String {
        let Some(key) = item.grouping_key.as_deref() else {
            return "ungrouped".to_string();
        };
        let cleaned: String = key
            .chars()
            .take(64)
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        if cleaned.is_empty() {
            "ungrouped".to_string()
        } else {
            cleaned
        }
    }
}

impl MessageProcessor for EmlExportProcessor {
    fn process(&self, message: &RawMessage<'_>, item: &WorkItem) -> anyhow::Result<ItemOutput> {
        let content = message.content();
        let parsed = MessageParser::default()
            .parse_headers(content)
            .ok_or_else(|| anyhow::anyhow!("message {} has no parseable headers", item.id))?;

        let file = format!("{}/{}.eml", Self::group_dir(item), item.id);
        let summary = MessageSummary {
            id: item.id,
            file: &file,
            subject: parsed.subject().map(str::to_string),
            from: parsed
                .from()
                .and_then(|from| from.first())
                .and_then(|addr| addr.address())
                .map(str::to_string),
            date: parsed.date().map(|date| date.to_rfc3339()),
            grouping_key: item.grouping_key.as_deref(),
            secondary_key: item.secondary_key.as_deref(),
            bytes: item.byte_length,
        };
        let record = RowRecord::json(item.id, &summary)?;

        Ok(ItemOutput::new()
            .with_file(file.clone(), content.to_vec())
            .with_row(format!("message-{}", item.id), record))
    }

    fn name(&self) -> &str {
        "eml-export"
    }
}
