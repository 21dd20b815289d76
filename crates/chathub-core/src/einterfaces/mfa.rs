//! Multi-factor authentication contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::result::AppResult;
use crate::types::UserId;

/// A freshly generated TOTP secret and its provisioning QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaSecret {
    /// Base32-encoded shared secret.
    pub secret: String,
    /// PNG bytes of the provisioning QR code.
    pub qr_code: Vec<u8>,
}

/// Multi-factor authentication operations.
#[async_trait]
pub trait MfaInterface: Send + Sync + 'static {
    /// Generates a new secret for the user without activating it.
    async fn generate_secret(&self, user_id: &UserId) -> AppResult<MfaSecret>;

    /// Activates MFA for the user after verifying `token`.
    async fn activate(&self, user_id: &UserId, token: &str) -> AppResult<()>;

    /// Turns MFA off for the user.
    async fn deactivate(&self, user_id: &UserId) -> AppResult<()>;

    /// Checks a token against the user's active secret.
    async fn validate_token(&self, user_id: &UserId, token: &str) -> AppResult<bool>;
}
