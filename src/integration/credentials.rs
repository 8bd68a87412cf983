//! [`CredentialStore`] bound to a single stored integration.

use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use super::IntegrationStore;
use crate::credentials::{CredentialStore, Credentials};

/// Credential mapping of one integration row.
///
/// Every mutation decrypts the current mapping, applies the change and writes
/// the fully re-encrypted mapping back. There is no optimistic concurrency
/// check; callers serialize access per integration.
#[derive(Clone)]
pub struct IntegrationCredentials {
    store: Arc<IntegrationStore>,
    integration_id: i64,
}

impl IntegrationCredentials {
    pub fn new(store: Arc<IntegrationStore>, integration_id: i64) -> Self {
        Self {
            store,
            integration_id,
        }
    }

    pub fn integration_id(&self) -> i64 {
        self.integration_id
    }
}

impl CredentialStore for IntegrationCredentials {
    fn all(&self) -> Result<Credentials> {
        self.store.load_credentials(self.integration_id)
    }

    fn replace_all(&self, credentials: &Credentials) -> Result<()> {
        self.store
            .store_credentials(self.integration_id, credentials)?;
        debug!(
            integration_id = self.integration_id,
            keys = credentials.len(),
            "Credentials rewritten"
        );
        Ok(())
    }
}
