pub mod chat;
pub mod daily;
pub mod journal;
pub mod user;

pub use chat::{ChatMessage, Role};
pub use daily::{DailyMotivation, DailyProgress};
pub use journal::JournalEntry;
pub use user::MirrorTwinUser;
