use serde::{Deserialize, Serialize};

/// Highest reachable progress level.
pub const MAX_PROGRESS: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorTwinUser {
    pub user_name: String,
    pub resolution: String,
    #[serde(default)]
    pub struggles: String,
    #[serde(default)]
    pub progress_level: u8,
}

impl MirrorTwinUser {
    pub fn new(
        user_name: impl Into<String>,
        resolution: impl Into<String>,
        struggles: impl Into<String>,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            resolution: resolution.into(),
            struggles: struggles.into(),
            progress_level: 0,
        }
    }

    /// Add a delta, saturating at [`MAX_PROGRESS`]. Progress never goes down.
    pub fn apply_progress(&mut self, delta: u8) -> u8 {
        self.progress_level = self
            .progress_level
            .saturating_add(delta)
            .min(MAX_PROGRESS);
        self.progress_level
    }
}
