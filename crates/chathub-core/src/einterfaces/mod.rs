//! Enterprise capability contracts.
//!
//! The server depends only on these traits. Concrete implementations are
//! supplied at startup through [`Enterprise`]; any contract left unset is
//! treated as "feature not available".

pub mod data_retention;
pub mod license;
pub mod mfa;

use std::sync::Arc;

pub use data_retention::{DataRetentionInterface, DataRetentionPolicy};
pub use license::LicenseInterface;
pub use mfa::{MfaInterface, MfaSecret};

/// Bundle of optional enterprise implementations installed at startup.
#[derive(Clone, Default)]
pub struct Enterprise {
    /// Data retention policy provider.
    pub data_retention: Option<Arc<dyn DataRetentionInterface>>,
    /// License checks.
    pub license: Option<Arc<dyn LicenseInterface>>,
    /// Multi-factor authentication.
    pub mfa: Option<Arc<dyn MfaInterface>>,
}

impl Enterprise {
    /// Creates an empty bundle with every contract unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a data retention implementation.
    pub fn with_data_retention(mut self, imp: Arc<dyn DataRetentionInterface>) -> Self {
        self.data_retention = Some(imp);
        self
    }

    /// Installs a license implementation.
    pub fn with_license(mut self, imp: Arc<dyn LicenseInterface>) -> Self {
        self.license = Some(imp);
        self
    }

    /// Installs an MFA implementation.
    pub fn with_mfa(mut self, imp: Arc<dyn MfaInterface>) -> Self {
        self.mfa = Some(imp);
        self
    }
}

impl std::fmt::Debug for Enterprise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enterprise")
            .field("data_retention", &self.data_retention.is_some())
            .field("license", &self.license.is_some())
            .field("mfa", &self.mfa.is_some())
            .finish()
    }
}
