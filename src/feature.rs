use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The two operations the service offers. Each one has its own cache
/// namespace, history stream and anonymous quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Restore,
    Edit,
}

impl Feature {
    pub const ALL: [Feature; 2] = [Feature::Restore, Feature::Edit];

    pub fn as_str(self) -> &'static str {
        match self {
            Feature::Restore => "restore",
            Feature::Edit => "edit",
        }
    }

    /// Prediction endpoint path, relative to the Replicate API base URL.
    pub fn model_path(self) -> &'static str {
        match self {
            Feature::Restore => "models/flux-kontext-apps/restore-image/predictions",
            Feature::Edit => "models/black-forest-labs/flux-kontext-max/predictions",
        }
    }

    /// Mime type assumed for model output that carries no type of its own.
    pub fn default_output_mime(self) -> &'static str {
        match self {
            Feature::Restore => "image/png",
            Feature::Edit => "image/jpeg",
        }
    }

    pub fn quota_message(self) -> &'static str {
        match self {
            Feature::Restore => "Anonymous limit reached. Please log in for more restores.",
            Feature::Edit => "Anonymous limit reached. Please log in for more edits.",
        }
    }

    /// Past participle used in user-facing messages ("restored image").
    pub fn participle(self) -> &'static str {
        match self {
            Feature::Restore => "restored",
            Feature::Edit => "edited",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restore" => Ok(Feature::Restore),
            "edit" => Ok(Feature::Edit),
            other => Err(format!("unknown feature `{other}`")),
        }
    }
}
