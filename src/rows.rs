//! CSV decoding and row validation.
use serde::Serialize;
use thiserror::Error;

use crate::model::{PublishItem, RawRow, ValidationError};

const MISSING_REQUIRED: &str = "missing title or image_url or board_id";

#[derive(Debug, Error)]
pub enum RowError {
    #[error("unreadable CSV header: {0}")]
    Header(#[from] csv::Error),
}

/// One data record: either a row keyed by header, or why it could not be read
/// together with whatever could be salvaged from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Row(RawRow),
    Unreadable { reason: String, row: RawRow },
}

/// Validation output for one batch.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Validated {
    pub rows_total: usize,
    pub items: Vec<PublishItem>,
    pub errors: Vec<ValidationError>,
}

impl Validated {
    pub fn rows_valid(&self) -> usize {
        self.items.len()
    }
}

/// Split CSV bytes into records. Header names are trimmed; short records are
/// padded with nothing (missing columns simply read as empty).
pub fn read_rows(bytes: &[u8]) -> Result<Vec<Record>, RowError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let keyed = |fields: Vec<String>| -> RawRow { headers.iter().cloned().zip(fields).collect() };

    let records = reader
        .byte_records()
        .map(|record| {
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    return Record::Unreadable {
                        reason: err.to_string(),
                        row: RawRow::new(),
                    }
                }
            };
            match csv::StringRecord::from_byte_record(record) {
                Ok(record) => Record::Row(keyed(record.iter().map(str::to_string).collect())),
                Err(err) => {
                    let reason = err.to_string();
                    let lossy = err
                        .into_byte_record()
                        .iter()
                        .map(|f| String::from_utf8_lossy(f).into_owned())
                        .collect();
                    Record::Unreadable {
                        reason,
                        row: keyed(lossy),
                    }
                }
            }
        })
        .collect();
    Ok(records)
}

fn field<'a>(row: &'a RawRow, name: &str) -> &'a str {
    row.get(name).map(|v| v.trim()).unwrap_or("")
}

/// Build a publishable item, or `None` if a required field is blank.
pub fn validate_row(row: &RawRow) -> Option<PublishItem> {
    let title = field(row, "title");
    let image_url = field(row, "image_url");
    let board_id = field(row, "board_id");
    if title.is_empty() || image_url.is_empty() || board_id.is_empty() {
        return None;
    }
    let link = field(row, "link");
    Some(PublishItem {
        title: title.to_string(),
        description: field(row, "description").to_string(),
        alt_text: field(row, "alt_text").to_string(),
        link: (!link.is_empty()).then(|| link.to_string()),
        image_url: image_url.to_string(),
        board_id: board_id.to_string(),
    })
}

/// Keep well-formed rows; collect the rest with their 1-based line number.
pub fn validate(records: Vec<Record>) -> Validated {
    let mut out = Validated {
        rows_total: records.len(),
        ..Validated::default()
    };
    for (i, record) in records.into_iter().enumerate() {
        let line = i + 1;
        match record {
            Record::Row(row) => match validate_row(&row) {
                Some(item) => out.items.push(item),
                None => out.errors.push(ValidationError {
                    line,
                    reason: MISSING_REQUIRED.into(),
                    row,
                }),
            },
            Record::Unreadable { reason, row } => out.errors.push(ValidationError {
                line,
                reason: format!("unreadable row: {reason}"),
                row,
            }),
        }
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<Validated, RowError> {
    Ok(validate(read_rows(bytes)?))
}
