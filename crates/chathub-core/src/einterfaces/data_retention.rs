//! Data retention contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::result::AppResult;

/// Global message and file retention policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRetentionPolicy {
    /// Whether message deletion is enforced.
    pub message_deletion_enabled: bool,
    /// Whether file deletion is enforced.
    pub file_deletion_enabled: bool,
    /// Messages older than this many days are removed.
    pub message_retention_days: u32,
    /// Files older than this many days are removed.
    pub file_retention_days: u32,
}

/// Source of the active data retention policy.
#[async_trait]
pub trait DataRetentionInterface: Send + Sync + 'static {
    /// Returns the currently active policy.
    async fn get_policy(&self) -> AppResult<DataRetentionPolicy>;
}
