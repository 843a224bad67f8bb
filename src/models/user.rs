use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserRole {
    Customer,
    Admin,
}

/// Portal identity. Sign-up and sessions live in the surrounding app; this
/// record only maps an API key to the caller it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    #[serde(skip_serializing)]
    pub api_key_hash: String,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub name: String,
    #[serde(default = "default_role")]
    pub role: UserRole,
}

fn default_role() -> UserRole {
    UserRole::Customer
}

impl CreateUser {
    pub fn validate(&self) -> Result<()> {
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::validation("email", "must be an email address"));
        }
        if self.name.trim().is_empty() {
            return Err(AppError::validation("name", "must not be empty"));
        }
        Ok(())
    }
}

/// Identity on whose behalf an engine operation runs.
///
/// Passed explicitly into every engine call instead of being read from
/// request-scoped state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Customer(String),
    Admin(String),
    /// Internal callers: provisioning, background sweep, CLI
    System,
}

impl Caller {
    pub fn from_user(user: &User) -> Self {
        match user.role {
            UserRole::Customer => Caller::Customer(user.id.clone()),
            UserRole::Admin => Caller::Admin(user.id.clone()),
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, Caller::Admin(_) | Caller::System)
    }

    /// Customers only see their own licenses.
    pub fn can_access(&self, owner_id: &str) -> bool {
        match self {
            Caller::Customer(id) => id == owner_id,
            Caller::Admin(_) | Caller::System => true,
        }
    }

    pub fn actor_type(&self) -> &'static str {
        match self {
            Caller::Customer(_) => "customer",
            Caller::Admin(_) => "admin",
            Caller::System => "system",
        }
    }

    pub fn actor_id(&self) -> Option<&str> {
        match self {
            Caller::Customer(id) | Caller::Admin(id) => Some(id),
            Caller::System => None,
        }
    }
}
