//! Persistence for activity records.
//!
//! `ActivityLogStore` is the seam the service talks to; `PgActivityLogStore`
//! backs it with the `activity_log` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool, Postgres, QueryBuilder};

use crate::{
    models::activity_log::{ActivityRecord, EntityKind, EntityRef},
    types::ActivityLogId,
};

const SELECT_ACTIVITY_COLUMNS: &str = "SELECT id, log_name, description, subject_type, \
     subject_id, causer_type, causer_id, properties, created_at FROM activity_log";

/// AND-combined filters. `None` fields do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityLogFilters {
    pub log_name: Option<String>,
    pub causer_type: Option<EntityKind>,
    pub causer_id: Option<String>,
    pub subject_type: Option<EntityKind>,
    pub subject_id: Option<String>,
}

impl ActivityLogFilters {
    pub fn for_subject(subject: &EntityRef) -> Self {
        Self {
            subject_type: Some(subject.kind),
            subject_id: Some(subject.id.clone()),
            ..Self::default()
        }
    }

    pub fn for_causer(causer: &EntityRef) -> Self {
        Self {
            causer_type: Some(causer.kind),
            causer_id: Some(causer.id.clone()),
            ..Self::default()
        }
    }

    pub fn for_log_name(log_name: impl Into<String>) -> Self {
        Self {
            log_name: Some(log_name.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &ActivityRecord) -> bool {
        fn check<T: PartialEq + ?Sized>(filter: Option<&T>, value: Option<&T>) -> bool {
            filter.map_or(true, |expected| value == Some(expected))
        }

        check(self.log_name.as_deref(), Some(record.log_name.as_str()))
            && check(
                self.causer_type.as_ref(),
                record.causer.as_ref().map(|causer| &causer.kind),
            )
            && check(self.causer_id.as_deref(), record.causer_id())
            && check(
                self.subject_type.as_ref(),
                record.subject.as_ref().map(|subject| &subject.kind),
            )
            && check(self.subject_id.as_deref(), record.subject_id())
    }
}

/// Repository trait for activity records.
///
/// Mockable with mockall; use `MockActivityLogStore` in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityLogStore: Send + Sync {
    /// Persist a new record, subject and causer included, in one write.
    async fn insert(&self, record: &ActivityRecord) -> Result<(), sqlx::Error>;

    async fn find(&self, id: ActivityLogId) -> Result<Option<ActivityRecord>, sqlx::Error>;

    /// Matching records, newest first, at most `limit` of them.
    async fn list(
        &self,
        filters: &ActivityLogFilters,
        limit: i64,
    ) -> Result<Vec<ActivityRecord>, sqlx::Error>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: ActivityLogId) -> Result<bool, sqlx::Error>;

    /// Removes every record created strictly before `cutoff`.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error>;

    /// Counts records created at or after `since`, or all records for `None`.
    async fn count_since(&self, since: Option<DateTime<Utc>>) -> Result<i64, sqlx::Error>;

    async fn count_by_log_name(&self) -> Result<Vec<(String, i64)>, sqlx::Error>;
}

#[derive(Debug, Clone)]
pub struct PgActivityLogStore {
    pool: PgPool,
}

impl PgActivityLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityLogStore for PgActivityLogStore {
    async fn insert(&self, record: &ActivityRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO activity_log \
             (id, log_name, description, subject_type, subject_id, causer_type, causer_id, \
             properties, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(record.id.to_string())
        .bind(&record.log_name)
        .bind(&record.description)
        .bind(record.subject_type())
        .bind(record.subject_id())
        .bind(record.causer_type())
        .bind(record.causer_id())
        .bind(Json(record.properties.clone()))
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map(|_| ())
    }

    async fn find(&self, id: ActivityLogId) -> Result<Option<ActivityRecord>, sqlx::Error> {
        let sql = format!("{} WHERE id = $1", SELECT_ACTIVITY_COLUMNS);
        let record = sqlx::query_as::<_, ActivityRecord>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list(
        &self,
        filters: &ActivityLogFilters,
        limit: i64,
    ) -> Result<Vec<ActivityRecord>, sqlx::Error> {
        let mut builder = list_query(filters, limit);
        let records = builder
            .build_query_as::<ActivityRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn delete(&self, id: ActivityLogId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM activity_log WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM activity_log WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_since(&self, since: Option<DateTime<Utc>>) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM activity_log \
             WHERE ($1::timestamptz IS NULL OR created_at >= $1)",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
    }

    async fn count_by_log_name(&self) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (String, i64)>(
            "SELECT log_name, COUNT(*) FROM activity_log GROUP BY log_name ORDER BY log_name",
        )
        .fetch_all(&self.pool)
        .await
    }
}

/// Newest first; rows sharing a `created_at` come back in reverse insertion
/// order.
fn list_query(filters: &ActivityLogFilters, limit: i64) -> QueryBuilder<'static, Postgres> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(SELECT_ACTIVITY_COLUMNS);
    let mut has_clause = false;
    apply_activity_filters(&mut builder, &mut has_clause, filters);
    builder
        .push(" ORDER BY created_at DESC, seq DESC LIMIT ")
        .push_bind(limit);
    builder
}

fn apply_activity_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    has_clause: &mut bool,
    filters: &ActivityLogFilters,
) {
    if let Some(log_name) = filters.log_name.as_ref() {
        push_clause(builder, has_clause);
        builder.push("log_name = ").push_bind(log_name.clone());
    }
    if let Some(causer_type) = filters.causer_type {
        push_clause(builder, has_clause);
        builder
            .push("causer_type = ")
            .push_bind(causer_type.as_str());
    }
    if let Some(causer_id) = filters.causer_id.as_ref() {
        push_clause(builder, has_clause);
        builder.push("causer_id = ").push_bind(causer_id.clone());
    }
    if let Some(subject_type) = filters.subject_type {
        push_clause(builder, has_clause);
        builder
            .push("subject_type = ")
            .push_bind(subject_type.as_str());
    }
    if let Some(subject_id) = filters.subject_id.as_ref() {
        push_clause(builder, has_clause);
        builder.push("subject_id = ").push_bind(subject_id.clone());
    }
}

fn push_clause(builder: &mut QueryBuilder<'_, Postgres>, has_clause: &mut bool) {
    if *has_clause {
        builder.push(" AND ");
    } else {
        builder.push(" WHERE ");
        *has_clause = true;
    }
}
