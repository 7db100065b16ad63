//! Evolution stage and streak/consistency derivation.
//!
//! Pure functions over the progress level and the set of journal dates.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::models::JournalEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvolutionStage {
    Emerging,
    Growing,
    Thriving,
    Radiant,
}

impl EvolutionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvolutionStage::Emerging => "Emerging",
            EvolutionStage::Growing => "Growing",
            EvolutionStage::Thriving => "Thriving",
            EvolutionStage::Radiant => "Radiant",
        }
    }
}

impl fmt::Display for EvolutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage plus the visual theme tokens the UI renders it with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TwinEvolution {
    pub stage: EvolutionStage,
    pub color: &'static str,
    pub glow: &'static str,
}

pub fn twin_evolution(progress_level: u8) -> TwinEvolution {
    match progress_level {
        0..=19 => TwinEvolution {
            stage: EvolutionStage::Emerging,
            color: "from-gray-400 to-gray-500",
            glow: "shadow-gray-500/20",
        },
        20..=49 => TwinEvolution {
            stage: EvolutionStage::Growing,
            color: "from-blue-400 to-blue-500",
            glow: "shadow-blue-500/30",
        },
        50..=79 => TwinEvolution {
            stage: EvolutionStage::Thriving,
            color: "from-purple-400 to-purple-500",
            glow: "shadow-purple-500/40",
        },
        _ => TwinEvolution {
            stage: EvolutionStage::Radiant,
            color: "from-yellow-400 to-amber-500",
            glow: "shadow-amber-500/50",
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consistency {
    Low,
    Medium,
    High,
}

impl Consistency {
    pub fn from_days_logged(days: usize) -> Self {
        if days >= 5 {
            Consistency::High
        } else if days >= 2 {
            Consistency::Medium
        } else {
            Consistency::Low
        }
    }
}

pub fn entry_dates(entries: &[JournalEntry]) -> BTreeSet<NaiveDate> {
    entries.iter().map(|e| e.date).collect()
}

fn days_back(today: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    std::iter::successors(Some(today), |d| d.checked_sub_days(Days::new(1)))
}

/// Consecutive logged days ending today. Zero when today has no entry.
pub fn current_streak(dates: &BTreeSet<NaiveDate>, today: NaiveDate) -> usize {
    days_back(today).take_while(|d| dates.contains(d)).count()
}

pub fn longest_streak(dates: &BTreeSet<NaiveDate>) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous: Option<NaiveDate> = None;

    for date in dates {
        current = match previous {
            Some(p) if p.succ_opt() == Some(*date) => current + 1,
            _ => 1,
        };
        longest = longest.max(current);
        previous = Some(*date);
    }
    longest
}

/// Oldest first; 1 for a logged day, 0 otherwise.
pub fn last_7_series(dates: &BTreeSet<NaiveDate>, today: NaiveDate) -> Vec<u8> {
    let mut series: Vec<u8> = days_back(today)
        .take(7)
        .map(|d| u8::from(dates.contains(&d)))
        .collect();
    series.reverse();
    series
}

pub fn last_7_days_count(dates: &BTreeSet<NaiveDate>, today: NaiveDate) -> usize {
    days_back(today).take(7).filter(|d| dates.contains(d)).count()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreakInsights {
    pub current_streak: usize,
    pub longest_streak: usize,
    pub last_7_days: usize,
    pub consistency: Consistency,
    pub series: Vec<u8>,
}

pub fn streak_insights(entries: &[JournalEntry], today: NaiveDate) -> StreakInsights {
    let dates = entry_dates(entries);
    let last_7_days = last_7_days_count(&dates, today);
    StreakInsights {
        current_streak: current_streak(&dates, today),
        longest_streak: longest_streak(&dates),
        last_7_days,
        consistency: Consistency::from_days_logged(last_7_days),
        series: last_7_series(&dates, today),
    }
}
