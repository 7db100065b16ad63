use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Per-day counters. A record for any other day is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyProgress {
    pub date: NaiveDate,
    pub log_count: u32,
    pub progress_logged: bool,
}

impl DailyProgress {
    pub fn fresh(date: NaiveDate) -> Self {
        Self {
            date,
            log_count: 0,
            progress_logged: false,
        }
    }

    /// Return the stored record when it is for `today`, otherwise a fresh one.
    pub fn for_day(stored: Option<Self>, today: NaiveDate) -> Self {
        match stored {
            Some(d) if d.date == today => d,
            _ => Self::fresh(today),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMotivation {
    pub date: NaiveDate,
    pub summary: String,
    #[serde(default)]
    pub strategy_suggestion: Option<String>,
}
