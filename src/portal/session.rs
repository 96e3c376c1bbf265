//! Per-browser session context shared by page controllers.

use super::error::PortalError;
use super::storage::{KeyValueStore, MemoryStore};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const ACCESS_TOKEN: &str = "accessToken";
pub const USERNAME: &str = "username";
pub const COGNITO_USER: &str = "cognitoUser";
pub const EMAIL: &str = "email";
pub const SUB: &str = "sub";
pub const RESET_USERNAME: &str = "resetUsername";

pub const USER_POOL_ID: &str = "userPoolId";
pub const CLIENT_ID: &str = "clientId";
pub const REGION: &str = "region";
pub const POOL_DATA: &str = "poolData";
pub const RETRY_ITEMS: &str = "retry_items";

/// Local storage outlives a login; session storage is cleared on logout.
pub struct SessionContext {
    pub local: Arc<dyn KeyValueStore>,
    pub session: Arc<dyn KeyValueStore>,
    /// Alerts raised since the last render, oldest first
    pub alerts: Vec<String>,
    /// Inline form errors keyed by field element
    pub field_errors: BTreeMap<String, String>,
}

impl SessionContext {
    pub fn new(local: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self {
            local,
            session,
            alerts: Vec::new(),
            field_errors: BTreeMap::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    pub fn access_token(&self) -> Result<String, PortalError> {
        self.session.get(ACCESS_TOKEN).ok_or(PortalError::Missing(ACCESS_TOKEN))
    }

    pub fn username(&self) -> Result<String, PortalError> {
        self.session.get(USERNAME).ok_or(PortalError::Missing(USERNAME))
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.contains(ACCESS_TOKEN)
    }

    /// Drop everything tied to the signed-in user.
    pub fn clear_session(&self) {
        self.session.clear();
    }

    pub fn take_alerts(&mut self) -> Vec<String> {
        std::mem::take(&mut self.alerts)
    }
}
