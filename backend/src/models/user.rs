//! Authenticated user accounts as seen by the activity log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::activity_log::EntityRef;

/// Database representation of a user account. The password hash is never
/// selected by this crate.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct User {
    pub id: String,
    pub institute_id: Option<String>,
    pub username: String,
    pub full_name: String,
    pub email: String,
    #[sqlx(try_from = "String")]
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, UserRole::Admin)
    }

    pub fn as_entity_ref(&self) -> EntityRef {
        EntityRef::user(self.id.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Staff,
    #[default]
    Student,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Staff => "staff",
            UserRole::Student => "student",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown user role `{0}`")]
pub struct UnknownUserRole(pub String);

impl TryFrom<String> for UserRole {
    type Error = UnknownUserRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "staff" => Ok(UserRole::Staff),
            "student" => Ok(UserRole::Student),
            _ => Err(UnknownUserRole(value)),
        }
    }
}
