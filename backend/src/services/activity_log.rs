use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    models::activity_log::{
        ActivityRecord, EntityRef, Properties, RequestContext, LOG_NAME_AUTH, LOG_NAME_BULK,
        LOG_NAME_EXPORT, LOG_NAME_FILE, LOG_NAME_IMPORT,
    },
    repositories::activity_log::{ActivityLogFilters, ActivityLogStore},
    types::ActivityLogId,
    utils::time,
};

pub const DEFAULT_ACTIVITY_LIMIT: i64 = 50;
pub const DEFAULT_RETENTION_DAYS: i64 = 90;
pub const STATS_RECENT_LIMIT: i64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityStats {
    pub total_activities: i64,
    pub today_activities: i64,
    pub this_week_activities: i64,
    pub this_month_activities: i64,
    pub activities_by_log_name: BTreeMap<String, i64>,
    pub recent_activities: Vec<ActivityRecord>,
}

/// Sole writer of activity records.
///
/// A service bound to a causer via [`ActivityLogService::caused_by`] stamps
/// that causer on every record it writes. Bound copies are cheap clones and are
/// meant to live for one request.
#[derive(Clone)]
pub struct ActivityLogService {
    store: Arc<dyn ActivityLogStore>,
    causer: Option<EntityRef>,
}

impl std::fmt::Debug for ActivityLogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLogService")
            .field("causer", &self.causer)
            .finish_non_exhaustive()
    }
}

impl ActivityLogService {
    pub fn new(store: Arc<dyn ActivityLogStore>) -> Self {
        Self {
            store,
            causer: None,
        }
    }

    pub fn caused_by(&self, causer: EntityRef) -> Self {
        Self {
            store: Arc::clone(&self.store),
            causer: Some(causer),
        }
    }

    pub fn causer(&self) -> Option<&EntityRef> {
        self.causer.as_ref()
    }

    pub async fn log(
        &self,
        description: &str,
        subject: Option<&EntityRef>,
        properties: Properties,
        log_name: &str,
    ) -> Result<ActivityRecord, sqlx::Error> {
        self.write(ActivityRecord::new(
            log_name,
            description,
            subject.cloned(),
            self.causer.clone(),
            properties,
        ))
        .await
    }

    pub async fn log_login(
        &self,
        causer: &EntityRef,
        context: Option<&RequestContext>,
    ) -> Result<ActivityRecord, sqlx::Error> {
        let mut properties = Properties::new();
        if let Some(context) = context {
            properties.insert("ip_address".into(), json!(context.ip_address));
            properties.insert("user_agent".into(), json!(context.user_agent));
        }
        properties.insert("login_at".into(), json!(now_rfc3339()));

        self.write(ActivityRecord::new(
            LOG_NAME_AUTH,
            "User logged in",
            None,
            Some(causer.clone()),
            properties,
        ))
        .await
    }

    pub async fn log_logout(&self, causer: &EntityRef) -> Result<ActivityRecord, sqlx::Error> {
        let mut properties = Properties::new();
        properties.insert("logout_at".into(), json!(now_rfc3339()));

        self.write(ActivityRecord::new(
            LOG_NAME_AUTH,
            "User logged out",
            None,
            Some(causer.clone()),
            properties,
        ))
        .await
    }

    /// One record summarising a batch; no single subject is attached.
    pub async fn log_bulk_operation(
        &self,
        operation_name: &str,
        subjects: &[EntityRef],
        mut properties: Properties,
    ) -> Result<ActivityRecord, sqlx::Error> {
        let mut kinds: Vec<&'static str> = Vec::new();
        for subject in subjects {
            let kind = subject.kind.as_str();
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        let ids: Vec<&str> = subjects.iter().map(|subject| subject.id.as_str()).collect();

        properties.insert("subject_types".into(), json!(kinds.join(", ")));
        properties.insert("subject_count".into(), json!(subjects.len()));
        properties.insert("subject_ids".into(), json!(ids));

        self.log(operation_name, None, properties, LOG_NAME_BULK)
            .await
    }

    /// Extras may add keys but never replace `file_name`, `operation` or
    /// `timestamp`.
    pub async fn log_file_operation(
        &self,
        operation: &str,
        file_name: &str,
        subject: Option<&EntityRef>,
        extra_properties: Properties,
    ) -> Result<ActivityRecord, sqlx::Error> {
        let mut properties = Properties::new();
        properties.insert("file_name".into(), json!(file_name));
        properties.insert("operation".into(), json!(operation));
        properties.insert("timestamp".into(), json!(now_rfc3339()));
        for (key, value) in extra_properties {
            properties.entry(key).or_insert(value);
        }

        let description = format!("File {}: {}", operation, file_name);
        self.log(&description, subject, properties, LOG_NAME_FILE)
            .await
    }

    pub async fn log_export(
        &self,
        export_type: &str,
        format: &str,
        record_count: Option<u64>,
    ) -> Result<ActivityRecord, sqlx::Error> {
        let mut properties = Properties::new();
        properties.insert("export_type".into(), json!(export_type));
        properties.insert("format".into(), json!(format));
        properties.insert("exported_at".into(), json!(now_rfc3339()));
        if let Some(count) = record_count {
            properties.insert("record_count".into(), json!(count));
        }

        let description = format!("Exported {} as {}", export_type, format);
        self.log(&description, None, properties, LOG_NAME_EXPORT)
            .await
    }

    pub async fn log_import(
        &self,
        import_type: &str,
        file_name: &str,
        record_count: Option<u64>,
        errors: &[String],
    ) -> Result<ActivityRecord, sqlx::Error> {
        let mut properties = Properties::new();
        properties.insert("import_type".into(), json!(import_type));
        properties.insert("file_name".into(), json!(file_name));
        properties.insert("imported_at".into(), json!(now_rfc3339()));
        properties.insert("has_errors".into(), Value::Bool(!errors.is_empty()));
        if let Some(count) = record_count {
            properties.insert("record_count".into(), json!(count));
        }
        if !errors.is_empty() {
            properties.insert("errors".into(), json!(errors));
        }

        let description = format!("Imported {} from {}", import_type, file_name);
        self.log(&description, None, properties, LOG_NAME_IMPORT)
            .await
    }

    pub async fn activities_for_subject(
        &self,
        subject: &EntityRef,
        limit: i64,
    ) -> Result<Vec<ActivityRecord>, sqlx::Error> {
        self.query(&ActivityLogFilters::for_subject(subject), limit)
            .await
    }

    pub async fn activities_by_causer(
        &self,
        causer: &EntityRef,
        limit: i64,
    ) -> Result<Vec<ActivityRecord>, sqlx::Error> {
        self.query(&ActivityLogFilters::for_causer(causer), limit)
            .await
    }

    pub async fn activities_by_log_name(
        &self,
        log_name: &str,
        limit: i64,
    ) -> Result<Vec<ActivityRecord>, sqlx::Error> {
        self.query(&ActivityLogFilters::for_log_name(log_name), limit)
            .await
    }

    pub async fn recent_activities(&self, limit: i64) -> Result<Vec<ActivityRecord>, sqlx::Error> {
        self.query(&ActivityLogFilters::default(), limit).await
    }

    pub async fn query(
        &self,
        filters: &ActivityLogFilters,
        limit: i64,
    ) -> Result<Vec<ActivityRecord>, sqlx::Error> {
        self.store.list(filters, limit).await
    }

    pub async fn find(&self, id: ActivityLogId) -> Result<Option<ActivityRecord>, sqlx::Error> {
        self.store.find(id).await
    }

    pub async fn delete(&self, id: ActivityLogId) -> Result<bool, sqlx::Error> {
        let deleted = self.store.delete(id).await?;
        if deleted {
            tracing::info!(activity_log_id = %id, "Deleted activity log");
        }
        Ok(deleted)
    }

    /// Irreversibly removes records created more than `days` days ago.
    pub async fn clean_old_activities(&self, days: i64) -> Result<u64, sqlx::Error> {
        let cutoff = Duration::try_days(days)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .ok_or_else(|| {
                sqlx::Error::Protocol(format!("retention window of {} days is out of range", days))
            })?;
        let deleted = self.store.delete_before(cutoff).await?;
        tracing::info!(days, %cutoff, deleted, "Cleaned old activity logs");
        Ok(deleted)
    }

    pub async fn stats(&self, tz: &Tz) -> Result<ActivityStats, sqlx::Error> {
        self.stats_at(tz, Utc::now()).await
    }

    pub async fn stats_at(
        &self,
        tz: &Tz,
        now: DateTime<Utc>,
    ) -> Result<ActivityStats, sqlx::Error> {
        let total_activities = self.store.count_since(None).await?;
        let today_activities = self
            .store
            .count_since(Some(time::start_of_day(tz, now)))
            .await?;
        let this_week_activities = self
            .store
            .count_since(Some(time::start_of_week(tz, now)))
            .await?;
        let this_month_activities = self
            .store
            .count_since(Some(time::start_of_month(tz, now)))
            .await?;
        let activities_by_log_name = self.store.count_by_log_name().await?.into_iter().collect();
        let recent_activities = self.recent_activities(STATS_RECENT_LIMIT).await?;

        Ok(ActivityStats {
            total_activities,
            today_activities,
            this_week_activities,
            this_month_activities,
            activities_by_log_name,
            recent_activities,
        })
    }

    async fn write(&self, record: ActivityRecord) -> Result<ActivityRecord, sqlx::Error> {
        if let Err(err) = self.store.insert(&record).await {
            tracing::error!(
                error = %err,
                log_name = %record.log_name,
                "failed to record activity"
            );
            return Err(err);
        }
        tracing::debug!(
            activity_log_id = %record.id,
            log_name = %record.log_name,
            causer = ?record.causer,
            "Recorded activity"
        );
        Ok(record)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::activity_log::{EntityKind, LOG_NAME_DEFAULT},
        repositories::{activity_log::MockActivityLogStore, memory::InMemoryActivityLogStore},
    };
    use chrono::TimeZone;

    fn service() -> (ActivityLogService, Arc<InMemoryActivityLogStore>) {
        let store = Arc::new(InMemoryActivityLogStore::new());
        (ActivityLogService::new(store.clone()), store)
    }

    fn seeded(log_name: &str, created_at: DateTime<Utc>) -> ActivityRecord {
        let mut record = ActivityRecord::new(log_name, "seeded", None, None, Properties::new());
        record.created_at = created_at;
        record
    }

    fn props(value: Value) -> Properties {
        value.as_object().cloned().expect("object")
    }

    #[tokio::test]
    async fn log_writes_exactly_one_matching_record() {
        let (service, store) = service();
        let subject = EntityRef::new(EntityKind::Student, "s-1");

        let record = service
            .log(
                "Student profile updated",
                Some(&subject),
                props(json!({ "field": "address" })),
                LOG_NAME_DEFAULT,
            )
            .await
            .expect("log");

        let stored = store.snapshot();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], record);
        assert_eq!(record.description, "Student profile updated");
        assert_eq!(record.log_name, "default");
        assert_eq!(record.subject, Some(subject));
        assert_eq!(record.causer, None);
        assert_eq!(record.properties["field"], "address");
    }

    #[tokio::test]
    async fn bound_causer_is_stamped_on_writes() {
        let (service, store) = service();
        let bound = service.caused_by(EntityRef::user("u-7"));

        bound
            .log("Committee created", None, Properties::new(), "default")
            .await
            .expect("log");
        service
            .log("Nightly sync", None, Properties::new(), "default")
            .await
            .expect("log");

        let stored = store.snapshot();
        assert_eq!(stored[0].causer, Some(EntityRef::user("u-7")));
        assert_eq!(stored[1].causer, None);
        assert!(service.causer().is_none());
    }

    #[tokio::test]
    async fn log_login_captures_request_context() {
        let (service, _store) = service();
        let user = EntityRef::user("u-1");
        let context = RequestContext {
            ip_address: Some("1.2.3.4".into()),
            user_agent: Some("curl/8.0".into()),
        };

        let record = service
            .log_login(&user, Some(&context))
            .await
            .expect("log login");

        assert_eq!(record.log_name, "auth");
        assert_eq!(record.description, "User logged in");
        assert_eq!(record.causer, Some(user));
        assert_eq!(record.properties["ip_address"], "1.2.3.4");
        assert_eq!(record.properties["user_agent"], "curl/8.0");
        assert!(record.properties["login_at"].is_string());
    }

    #[tokio::test]
    async fn log_login_without_context_only_records_timestamp() {
        let (service, _store) = service();
        let record = service
            .log_login(&EntityRef::user("u-1"), None)
            .await
            .expect("log login");
        assert_eq!(record.properties.len(), 1);
        assert!(record.properties.contains_key("login_at"));
    }

    #[tokio::test]
    async fn log_logout_records_only_timestamp() {
        let (service, _store) = service();
        let record = service
            .log_logout(&EntityRef::user("u-1"))
            .await
            .expect("log logout");
        assert_eq!(record.log_name, "auth");
        assert_eq!(record.description, "User logged out");
        assert_eq!(
            record.properties.keys().collect::<Vec<_>>(),
            vec!["logout_at"]
        );
    }

    #[tokio::test]
    async fn bulk_operation_dedupes_kinds_and_keeps_id_order() {
        let (service, _store) = service();
        let subjects = vec![
            EntityRef::new(EntityKind::Student, "s-2"),
            EntityRef::new(EntityKind::Course, "c-1"),
            EntityRef::new(EntityKind::Student, "s-1"),
        ];

        let record = service
            .log_bulk_operation(
                "Bulk promoted students",
                &subjects,
                props(json!({ "semester": 3 })),
            )
            .await
            .expect("bulk");

        assert_eq!(record.log_name, "bulk");
        assert_eq!(record.description, "Bulk promoted students");
        assert_eq!(record.subject, None);
        assert_eq!(record.properties["subject_types"], "student, course");
        assert_eq!(record.properties["subject_count"], 3);
        assert_eq!(record.properties["subject_ids"], json!(["s-2", "c-1", "s-1"]));
        assert_eq!(record.properties["semester"], 3);
    }

    #[tokio::test]
    async fn file_operation_keeps_fixed_keys_on_collision() {
        let (service, _store) = service();
        let subject = EntityRef::new(EntityKind::Staff, "st-1");

        let record = service
            .log_file_operation(
                "uploaded",
                "cv.pdf",
                Some(&subject),
                props(json!({ "size": 1024, "file_name": "other.pdf" })),
            )
            .await
            .expect("file op");

        assert_eq!(record.log_name, "file");
        assert_eq!(record.description, "File uploaded: cv.pdf");
        assert_eq!(record.subject, Some(subject));
        assert_eq!(record.properties["file_name"], "cv.pdf");
        assert_eq!(record.properties["operation"], "uploaded");
        assert_eq!(record.properties["size"], 1024);
        assert!(record.properties["timestamp"].is_string());
    }

    #[tokio::test]
    async fn export_omits_record_count_unless_given() {
        let (service, _store) = service();

        let without = service
            .log_export("students", "pdf", None)
            .await
            .expect("export");
        assert_eq!(without.log_name, "export");
        assert!(!without.properties.contains_key("record_count"));
        assert_eq!(without.properties["export_type"], "students");
        assert_eq!(without.properties["format"], "pdf");
        assert!(without.properties.contains_key("exported_at"));

        let zero = service
            .log_export("students", "csv", Some(0))
            .await
            .expect("export");
        assert_eq!(zero.properties["record_count"], 0);
    }

    #[tokio::test]
    async fn import_reports_errors_only_when_present() {
        let (service, _store) = service();

        let clean = service
            .log_import("courses", "courses.xlsx", Some(12), &[])
            .await
            .expect("import");
        assert_eq!(clean.log_name, "import");
        assert_eq!(clean.properties["has_errors"], false);
        assert!(!clean.properties.contains_key("errors"));
        assert_eq!(clean.properties["record_count"], 12);

        let failed = service
            .log_import(
                "courses",
                "courses.xlsx",
                None,
                &["row 3: missing code".to_string()],
            )
            .await
            .expect("import");
        assert_eq!(failed.properties["has_errors"], true);
        assert_eq!(failed.properties["errors"], json!(["row 3: missing code"]));
        assert!(!failed.properties.contains_key("record_count"));
    }

    #[tokio::test]
    async fn listings_are_newest_first_and_capped() {
        let (service, store) = service();
        let now = Utc::now();
        for days_ago in [5, 1, 3, 2, 4] {
            store.seed(seeded("auth", now - Duration::days(days_ago)));
        }
        store.seed(seeded("file", now));

        let auth = service
            .activities_by_log_name("auth", 3)
            .await
            .expect("list");
        assert_eq!(auth.len(), 3);
        assert!(auth.iter().all(|record| record.log_name == "auth"));
        assert!(auth
            .windows(2)
            .all(|pair| pair[0].created_at >= pair[1].created_at));
        assert_eq!(auth[0].created_at, now - Duration::days(1));

        let recent = service.recent_activities(50).await.expect("recent");
        assert_eq!(recent.len(), 6);
        assert_eq!(recent[0].log_name, "file");
    }

    #[tokio::test]
    async fn subject_and_causer_listings_filter_by_reference() {
        let (service, _store) = service();
        let course = EntityRef::new(EntityKind::Course, "c-1");
        let alice = service.caused_by(EntityRef::user("alice"));
        let bob = service.caused_by(EntityRef::user("bob"));

        alice
            .log("Course created", Some(&course), Properties::new(), "default")
            .await
            .unwrap();
        bob.log("Course renamed", Some(&course), Properties::new(), "default")
            .await
            .unwrap();
        bob.log("Other", None, Properties::new(), "default")
            .await
            .unwrap();

        let for_course = service
            .activities_for_subject(&course, DEFAULT_ACTIVITY_LIMIT)
            .await
            .unwrap();
        assert_eq!(for_course.len(), 2);

        let by_bob = service
            .activities_by_causer(&EntityRef::user("bob"), DEFAULT_ACTIVITY_LIMIT)
            .await
            .unwrap();
        assert_eq!(by_bob.len(), 2);
        assert!(by_bob
            .iter()
            .all(|record| record.causer_id() == Some("bob")));
    }

    #[tokio::test]
    async fn clean_old_activities_deletes_only_expired_records() {
        let (service, store) = service();
        let now = Utc::now();
        store.seed(seeded("default", now - Duration::days(100)));
        store.seed(seeded("default", now - Duration::days(91)));
        let kept = seeded("default", now - Duration::days(10));
        store.seed(kept.clone());

        let deleted = service.clean_old_activities(90).await.expect("clean");

        assert_eq!(deleted, 2);
        assert_eq!(store.snapshot(), vec![kept]);
    }

    #[tokio::test]
    async fn clean_old_activities_rejects_unrepresentable_windows() {
        let (service, store) = service();
        store.seed(seeded("default", Utc::now() - Duration::days(400)));

        let err = service
            .clean_old_activities(200_000_000)
            .await
            .expect_err("window out of range");
        assert!(matches!(err, sqlx::Error::Protocol(_)));
        assert_eq!(store.len(), 1);

        assert!(service.clean_old_activities(i64::MAX).await.is_err());
    }

    #[tokio::test]
    async fn retention_cutoff_is_strict() {
        let store = InMemoryActivityLogStore::new();
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store.seed(seeded("default", cutoff));
        store.seed(seeded("default", cutoff - Duration::seconds(1)));

        let deleted = store.delete_before(cutoff).await.expect("delete");

        assert_eq!(deleted, 1);
        assert_eq!(store.snapshot()[0].created_at, cutoff);
    }

    #[tokio::test]
    async fn delete_reports_missing_records() {
        let (service, _store) = service();
        let record = service
            .log("Inventory item added", None, Properties::new(), "default")
            .await
            .unwrap();

        assert!(service.delete(record.id).await.unwrap());
        assert!(!service.delete(record.id).await.unwrap());
        assert!(service.find(record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stats_bucket_by_local_calendar() {
        let (service, store) = service();
        let tz = chrono_tz::UTC;
        // Wednesday 2024-05-15 12:00.
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap();
        store.seed(seeded("auth", now - Duration::hours(1)));
        store.seed(seeded("auth", now - Duration::days(1)));
        store.seed(seeded("export", now - Duration::days(5)));
        store.seed(seeded("import", now - Duration::days(40)));

        let stats = service.stats_at(&tz, now).await.expect("stats");

        assert_eq!(stats.total_activities, 4);
        assert_eq!(stats.today_activities, 1);
        assert_eq!(stats.this_week_activities, 2);
        assert_eq!(stats.this_month_activities, 3);
        assert_eq!(stats.activities_by_log_name["auth"], 2);
        assert_eq!(stats.activities_by_log_name["export"], 1);
        assert_eq!(stats.activities_by_log_name["import"], 1);
        assert_eq!(stats.recent_activities.len(), 4);
        assert_eq!(stats.recent_activities[0].created_at, now - Duration::hours(1));
    }

    #[tokio::test]
    async fn storage_failures_propagate_without_retry() {
        let mut store = MockActivityLogStore::new();
        store
            .expect_insert()
            .times(1)
            .returning(|_| Err(sqlx::Error::PoolTimedOut));
        let service = ActivityLogService::new(Arc::new(store));

        let err = service
            .log_export("fees", "xlsx", Some(3))
            .await
            .expect_err("storage error");
        assert!(matches!(err, sqlx::Error::PoolTimedOut));
    }

    #[tokio::test]
    async fn clean_old_activities_passes_cutoff_to_store() {
        let mut store = MockActivityLogStore::new();
        store
            .expect_delete_before()
            .withf(|cutoff| {
                let expected = Utc::now() - Duration::days(30);
                (*cutoff - expected).num_seconds().abs() < 5
            })
            .times(1)
            .returning(|_| Ok(7));
        let service = ActivityLogService::new(Arc::new(store));

        assert_eq!(service.clean_old_activities(30).await.unwrap(), 7);
    }
}
