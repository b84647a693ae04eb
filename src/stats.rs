use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::store::OperationRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureStats {
    pub total: usize,
    pub this_week: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    pub restorations: FeatureStats,
    pub edits: FeatureStats,
}

/// Count records, and those newer than seven days before `now`.
pub fn summarize(records: &[OperationRecord], now: DateTime<Utc>) -> FeatureStats {
    let week_ago = now - Duration::days(7);
    FeatureStats {
        total: records.len(),
        this_week: records.iter().filter(|r| r.created_at > week_ago).count(),
    }
}
