//! Resolves tagged references into the referenced entity's JSON document.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{types::Json, PgPool};
use std::collections::{HashMap, HashSet};

use crate::models::activity_log::{EntityKind, EntityRef};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// Documents of the `kind` rows whose ids are in `ids`, keyed by id.
    /// Rows that no longer exist are simply absent.
    async fn resolve_batch(
        &self,
        kind: EntityKind,
        ids: &[String],
    ) -> Result<HashMap<String, Value>, sqlx::Error>;
}

#[derive(Debug, Clone)]
pub struct PgEntityResolver {
    pool: PgPool,
}

impl PgEntityResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityResolver for PgEntityResolver {
    async fn resolve_batch(
        &self,
        kind: EntityKind,
        ids: &[String],
    ) -> Result<HashMap<String, Value>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        // Table names come from `EntityKind`, never from input.
        let sql = format!(
            "SELECT t.id, to_jsonb(t) - 'password_hash' FROM {} t WHERE t.id = ANY($1)",
            kind.table()
        );
        let rows = sqlx::query_as::<_, (String, Json<Value>)>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, Json(document))| (id, document))
            .collect())
    }
}

/// Resolves every distinct reference with one lookup per entity kind.
pub async fn resolve_all<'a, I>(
    resolver: &dyn EntityResolver,
    references: I,
) -> Result<HashMap<EntityRef, Value>, sqlx::Error>
where
    I: IntoIterator<Item = &'a EntityRef>,
{
    let mut seen = HashSet::new();
    let mut by_kind: Vec<(EntityKind, Vec<String>)> = Vec::new();
    for reference in references {
        if !seen.insert(reference) {
            continue;
        }
        match by_kind.iter_mut().find(|(kind, _)| *kind == reference.kind) {
            Some((_, ids)) => ids.push(reference.id.clone()),
            None => by_kind.push((reference.kind, vec![reference.id.clone()])),
        }
    }

    let mut resolved = HashMap::new();
    for (kind, ids) in by_kind {
        let documents = resolver.resolve_batch(kind, &ids).await?;
        resolved.extend(
            documents
                .into_iter()
                .map(|(id, document)| (EntityRef::new(kind, id), document)),
        );
    }
    Ok(resolved)
}
