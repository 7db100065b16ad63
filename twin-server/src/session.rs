//! Session state as the HTTP layer sees it: one load, targeted saves.

use chrono::NaiveDate;
use twin_core::models::{ChatMessage, DailyProgress, JournalEntry, MirrorTwinUser};
use twin_core::store::{self, SessionStore, DAILY_KEY, HISTORY_KEY, JOURNAL_KEY, USER_KEY};
use twin_core::TwinError;

#[derive(Debug, Clone)]
pub struct Session {
    pub user: Option<MirrorTwinUser>,
    pub journal: Vec<JournalEntry>,
    pub history: Vec<ChatMessage>,
    pub daily: DailyProgress,
}

impl Session {
    /// Load everything. The daily counters are reset when they belong to another day.
    pub async fn load(store: &dyn SessionStore, today: NaiveDate) -> Result<Self, TwinError> {
        let user = store::load::<MirrorTwinUser>(store, USER_KEY).await?;
        let journal = store::load::<Vec<JournalEntry>>(store, JOURNAL_KEY)
            .await?
            .unwrap_or_default();
        let history = store::load::<Vec<ChatMessage>>(store, HISTORY_KEY)
            .await?
            .unwrap_or_default();
        let daily = DailyProgress::for_day(store::load(store, DAILY_KEY).await?, today);

        Ok(Self {
            user,
            journal,
            history,
            daily,
        })
    }

    pub fn todays_entries(&self, today: NaiveDate) -> Vec<&JournalEntry> {
        self.journal.iter().filter(|e| e.date == today).collect()
    }

    pub async fn save_user(&self, store: &dyn SessionStore) -> Result<(), TwinError> {
        match &self.user {
            Some(user) => Ok(store::save(store, USER_KEY, user).await?),
            None => Ok(()),
        }
    }

    pub async fn save_journal(&self, store: &dyn SessionStore) -> Result<(), TwinError> {
        Ok(store::save(store, JOURNAL_KEY, &self.journal).await?)
    }

    pub async fn save_history(&self, store: &dyn SessionStore) -> Result<(), TwinError> {
        Ok(store::save(store, HISTORY_KEY, &self.history).await?)
    }

    pub async fn save_daily(&self, store: &dyn SessionStore) -> Result<(), TwinError> {
        Ok(store::save(store, DAILY_KEY, &self.daily).await?)
    }
}

pub fn welcome_message(user_name: &str) -> ChatMessage {
    ChatMessage::assistant(format!(
        "Hey {}! I'm your mirror twin - the future version of you. Let's do this together! 🌟",
        user_name
    ))
}
