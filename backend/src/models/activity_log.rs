//! Activity records and the tagged references that point at their subject and
//! causer.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, types::Json, FromRow, Row};
use std::{fmt, str::FromStr};
use thiserror::Error;
use utoipa::ToSchema;

use crate::types::ActivityLogId;

/// Schema-less metadata attached to a record. Each call site contributes its
/// own keys.
pub type Properties = Map<String, Value>;

pub const LOG_NAME_DEFAULT: &str = "default";
pub const LOG_NAME_AUTH: &str = "auth";
pub const LOG_NAME_BULK: &str = "bulk";
pub const LOG_NAME_FILE: &str = "file";
pub const LOG_NAME_EXPORT: &str = "export";
pub const LOG_NAME_IMPORT: &str = "import";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown entity kind `{0}`")]
pub struct UnknownEntityKind(pub String);

#[derive(Debug, Error)]
pub enum ReferenceDecodeError {
    #[error("`{type_column}` and `{id_column}` must both be set or both be null")]
    HalfSet {
        type_column: &'static str,
        id_column: &'static str,
    },
    #[error(transparent)]
    UnknownKind(#[from] UnknownEntityKind),
}

/// Every entity an activity can reference as its subject or causer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Institute,
    Staff,
    Student,
    Course,
    Committee,
    LeaveApplication,
    InventoryItem,
    CashierRecord,
    Notification,
}

impl EntityKind {
    pub const ALL: [EntityKind; 10] = [
        EntityKind::User,
        EntityKind::Institute,
        EntityKind::Staff,
        EntityKind::Student,
        EntityKind::Course,
        EntityKind::Committee,
        EntityKind::LeaveApplication,
        EntityKind::InventoryItem,
        EntityKind::CashierRecord,
        EntityKind::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Institute => "institute",
            EntityKind::Staff => "staff",
            EntityKind::Student => "student",
            EntityKind::Course => "course",
            EntityKind::Committee => "committee",
            EntityKind::LeaveApplication => "leave_application",
            EntityKind::InventoryItem => "inventory_item",
            EntityKind::CashierRecord => "cashier_record",
            EntityKind::Notification => "notification",
        }
    }

    /// Table holding rows of this kind.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::User => "users",
            EntityKind::Institute => "institutes",
            EntityKind::Staff => "staff",
            EntityKind::Student => "students",
            EntityKind::Course => "courses",
            EntityKind::Committee => "committees",
            EntityKind::LeaveApplication => "leave_applications",
            EntityKind::InventoryItem => "inventory_items",
            EntityKind::CashierRecord => "cashier_records",
            EntityKind::Notification => "notifications",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = UnknownEntityKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownEntityKind(s.to_string()))
    }
}

/// Polymorphic pointer into another entity's table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(EntityKind::User, id)
    }

    /// Builds a reference from a nullable type/id column pair.
    pub fn from_parts(
        kind: Option<&str>,
        id: Option<&str>,
    ) -> Result<Option<Self>, ReferenceDecodeError> {
        match (kind, id) {
            (Some(kind), Some(id)) => Ok(Some(Self::new(kind.parse()?, id))),
            (None, None) => Ok(None),
            _ => Err(ReferenceDecodeError::HalfSet {
                type_column: "type",
                id_column: "id",
            }),
        }
    }
}

/// One logged action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub id: ActivityLogId,
    pub log_name: String,
    pub description: String,
    pub subject: Option<EntityRef>,
    pub causer: Option<EntityRef>,
    pub properties: Properties,
    pub created_at: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(
        log_name: impl Into<String>,
        description: impl Into<String>,
        subject: Option<EntityRef>,
        causer: Option<EntityRef>,
        properties: Properties,
    ) -> Self {
        Self {
            id: ActivityLogId::new(),
            log_name: log_name.into(),
            description: description.into(),
            subject,
            causer,
            properties,
            // Postgres TIMESTAMPTZ precision.
            created_at: Utc::now().trunc_subsecs(6),
        }
    }

    pub fn subject_type(&self) -> Option<&'static str> {
        self.subject.as_ref().map(|subject| subject.kind.as_str())
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.subject.as_ref().map(|subject| subject.id.as_str())
    }

    pub fn causer_type(&self) -> Option<&'static str> {
        self.causer.as_ref().map(|causer| causer.kind.as_str())
    }

    pub fn causer_id(&self) -> Option<&str> {
        self.causer.as_ref().map(|causer| causer.id.as_str())
    }
}

impl<'r> FromRow<'r, PgRow> for ActivityRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let raw_id: String = row.try_get("id")?;
        let id = raw_id
            .parse::<ActivityLogId>()
            .map_err(|err| sqlx::Error::ColumnDecode {
                index: "id".into(),
                source: Box::new(err),
            })?;

        let subject = reference_from_row(row, "subject_type", "subject_id")?;
        let causer = reference_from_row(row, "causer_type", "causer_id")?;
        let properties: Json<Properties> = row.try_get("properties")?;

        Ok(Self {
            id,
            log_name: row.try_get("log_name")?,
            description: row.try_get("description")?,
            subject,
            causer,
            properties: properties.0,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn reference_from_row(
    row: &PgRow,
    type_column: &'static str,
    id_column: &'static str,
) -> Result<Option<EntityRef>, sqlx::Error> {
    let kind: Option<String> = row.try_get(type_column)?;
    let id: Option<String> = row.try_get(id_column)?;
    EntityRef::from_parts(kind.as_deref(), id.as_deref()).map_err(|err| match err {
        ReferenceDecodeError::HalfSet { .. } => {
            sqlx::Error::Decode(Box::new(ReferenceDecodeError::HalfSet {
                type_column,
                id_column,
            }))
        }
        other => sqlx::Error::Decode(Box::new(other)),
    })
}

/// Client IP and user agent captured at the HTTP boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip_address = headers
            .get("x-forwarded-for")
            .or_else(|| headers.get("x-real-ip"))
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Self {
            ip_address,
            user_agent,
        }
    }
}
