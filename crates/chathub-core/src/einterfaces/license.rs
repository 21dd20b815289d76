//! License contract.

use async_trait::async_trait;

use crate::result::AppResult;

/// License validation provided by the enterprise build.
#[async_trait]
pub trait LicenseInterface: Send + Sync + 'static {
    /// Whether a trial license may be started on this installation.
    async fn can_start_trial(&self) -> AppResult<bool>;

    /// Whether a valid license is currently installed.
    async fn is_licensed(&self) -> AppResult<bool>;
}
