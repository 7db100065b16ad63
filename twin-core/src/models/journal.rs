use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One journal line. Only `progress_delta`/`ai_reason` are ever filled in
/// after the fact, by the day's progress evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub date: NaiveDate,
    pub entry: String,
    pub progress_before: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_delta: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_reason: Option<String>,
}

impl JournalEntry {
    pub fn new(date: NaiveDate, entry: impl Into<String>, progress_before: u8) -> Self {
        Self {
            date,
            entry: entry.into(),
            progress_before,
            progress_delta: None,
            ai_reason: None,
        }
    }
}
