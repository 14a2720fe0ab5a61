use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account role. Stored as a discriminator column plus a nullable
/// role-payload column, but modelled as a sum type so role-specific data
/// cannot leak into the wrong variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UserRole {
    Client,
    Operator { assigned_event: Option<Uuid> },
    Administrator,
}

impl UserRole {
    pub fn tag(&self) -> &'static str {
        match self {
            UserRole::Client => "client",
            UserRole::Operator { .. } => "operator",
            UserRole::Administrator => "administrator",
        }
    }

    pub fn assigned_event(&self) -> Option<Uuid> {
        match self {
            UserRole::Operator { assigned_event } => *assigned_event,
            _ => None,
        }
    }

    /// Rebuilds the sum type from its persisted `(tag, payload)` pair.
    pub fn from_parts(tag: &str, assigned_event: Option<Uuid>) -> Result<Self, String> {
        match tag {
            "client" => Ok(UserRole::Client),
            "operator" => Ok(UserRole::Operator { assigned_event }),
            "administrator" => Ok(UserRole::Administrator),
            other => Err(format!("unknown user role '{other}'")),
        }
    }

    pub fn may_validate(&self) -> bool {
        matches!(self, UserRole::Operator { .. } | UserRole::Administrator)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// National identity document (RUT), normalized on write.
    pub document: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RegisterUser {
    pub name: String,
    pub email: String,
    pub document: String,
    pub role: UserRole,
}
