use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    str::FromStr,
};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    error::AppError,
    models::activity_log::{ActivityRecord, EntityKind, EntityRef, Properties, LOG_NAME_DEFAULT},
    repositories::{activity_log::ActivityLogFilters, entity},
    services::{
        activity_log::{DEFAULT_ACTIVITY_LIMIT, DEFAULT_RETENTION_DAYS},
        ActivityLogService, ActivityStats,
    },
    state::AppState,
    types::ActivityLogId,
};

pub const MAX_ACTIVITY_LIMIT: i64 = 500;

/// Read and maintenance routes. Mount behind `auth` + `require_admin`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/activity-logs", get(list_activity_logs))
        .route("/api/activity-logs/stats", get(activity_log_stats))
        .route("/api/activity-logs/clean", post(clean_activity_logs))
        .route(
            "/api/activity-logs/subject/{subject_type}/{subject_id}",
            get(subject_activity_logs),
        )
        .route(
            "/api/activity-logs/causer/{causer_id}",
            get(causer_activity_logs),
        )
        .route(
            "/api/activity-logs/log/{log_name}",
            get(log_name_activity_logs),
        )
        .route(
            "/api/activity-logs/{id}",
            get(get_activity_log).delete(delete_activity_log),
        )
}

/// Routes open to any authenticated user. Mount behind `auth` +
/// `resolve_causer`.
pub fn user_routes() -> Router<AppState> {
    Router::new().route("/api/activity-logs", post(record_activity))
}

#[derive(Debug, Default, Deserialize, Serialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct ActivityLogListQuery {
    /// Maximum number of records (default 50, at most 500).
    pub limit: Option<i64>,
    pub log_name: Option<String>,
    pub causer_id: Option<String>,
    /// Entity kind, e.g. `student` or `course`.
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize, Validate, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct CleanQuery {
    /// Delete records older than this many days (default 90).
    #[validate(range(min = 1, max = 36500))]
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct RecordActivityPayload {
    #[validate(length(min = 1, max = 1000))]
    pub description: String,
    #[validate(length(min = 1, max = 64))]
    pub log_name: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub properties: Option<Properties>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActivityLogResponse {
    pub id: String,
    pub log_name: String,
    pub description: String,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub causer_type: Option<String>,
    pub causer_id: Option<String>,
    #[schema(value_type = Object)]
    pub properties: Properties,
    pub created_at: DateTime<Utc>,
    /// The subject entity, `null` when absent or deleted.
    #[schema(value_type = Option<Object>)]
    pub subject: Option<Value>,
    /// The causer entity, `null` when absent or deleted.
    #[schema(value_type = Option<Object>)]
    pub causer: Option<Value>,
}

impl ActivityLogResponse {
    fn from_record(record: ActivityRecord, resolved: &HashMap<EntityRef, Value>) -> Self {
        let lookup = |reference: &Option<EntityRef>| {
            reference
                .as_ref()
                .and_then(|reference| resolved.get(reference))
                .cloned()
        };
        let subject = lookup(&record.subject);
        let causer = lookup(&record.causer);
        Self {
            id: record.id.to_string(),
            subject_type: record.subject_type().map(str::to_string),
            subject_id: record.subject_id().map(str::to_string),
            causer_type: record.causer_type().map(str::to_string),
            causer_id: record.causer_id().map(str::to_string),
            log_name: record.log_name,
            description: record.description,
            properties: record.properties,
            created_at: record.created_at,
            subject,
            causer,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActivityLogListResponse {
    pub success: bool,
    pub data: Vec<ActivityLogResponse>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActivityLogDetailResponse {
    pub success: bool,
    pub data: ActivityLogResponse,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActivityStatsData {
    pub total_activities: i64,
    pub today_activities: i64,
    pub this_week_activities: i64,
    pub this_month_activities: i64,
    pub activities_by_log_name: BTreeMap<String, i64>,
    pub recent_activities: Vec<ActivityLogResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActivityStatsResponse {
    pub success: bool,
    pub data: ActivityStatsData,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CleanActivityLogsResponse {
    pub success: bool,
    pub message: String,
    pub deleted_count: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

pub async fn list_activity_logs(
    State(state): State<AppState>,
    Query(q): Query<ActivityLogListQuery>,
) -> Result<Json<ActivityLogListResponse>, AppError> {
    let limit = clamp_limit(q.limit);
    let filters = build_filters(q)?;
    let records = state
        .activity_log
        .query(&filters, limit)
        .await
        .map_err(AppError::storage("Failed to fetch activity logs"))?;
    list_response(&state, records).await.map(Json)
}

pub async fn subject_activity_logs(
    State(state): State<AppState>,
    Path((subject_type, subject_id)): Path<(String, String)>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<ActivityLogListResponse>, AppError> {
    let subject = EntityRef::new(parse_kind(&subject_type)?, subject_id);
    let records = state
        .activity_log
        .activities_for_subject(&subject, clamp_limit(q.limit))
        .await
        .map_err(AppError::storage("Failed to fetch subject activities"))?;
    list_response(&state, records).await.map(Json)
}

pub async fn causer_activity_logs(
    State(state): State<AppState>,
    Path(causer_id): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<ActivityLogListResponse>, AppError> {
    let records = state
        .activity_log
        .activities_by_causer(&EntityRef::user(causer_id), clamp_limit(q.limit))
        .await
        .map_err(AppError::storage("Failed to fetch causer activities"))?;
    list_response(&state, records).await.map(Json)
}

pub async fn log_name_activity_logs(
    State(state): State<AppState>,
    Path(log_name): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<ActivityLogListResponse>, AppError> {
    let records = state
        .activity_log
        .activities_by_log_name(&log_name, clamp_limit(q.limit))
        .await
        .map_err(AppError::storage("Failed to fetch log activities"))?;
    list_response(&state, records).await.map(Json)
}

pub async fn activity_log_stats(
    State(state): State<AppState>,
) -> Result<Json<ActivityStatsResponse>, AppError> {
    let ActivityStats {
        total_activities,
        today_activities,
        this_week_activities,
        this_month_activities,
        activities_by_log_name,
        recent_activities,
    } = state
        .activity_log
        .stats(&state.config.time_zone)
        .await
        .map_err(AppError::storage("Failed to fetch activity statistics"))?;

    let recent = list_response(&state, recent_activities).await?;
    Ok(Json(ActivityStatsResponse {
        success: true,
        data: ActivityStatsData {
            total_activities,
            today_activities,
            this_week_activities,
            this_month_activities,
            activities_by_log_name,
            recent_activities: recent.data,
        },
    }))
}

pub async fn clean_activity_logs(
    State(state): State<AppState>,
    Query(q): Query<CleanQuery>,
) -> Result<Json<CleanActivityLogsResponse>, AppError> {
    q.validate()?;
    let days = q.days.unwrap_or(DEFAULT_RETENTION_DAYS);
    let deleted_count = state
        .activity_log
        .clean_old_activities(days)
        .await
        .map_err(AppError::storage("Failed to clean activity logs"))?;

    Ok(Json(CleanActivityLogsResponse {
        success: true,
        message: format!(
            "Deleted {} activity logs older than {} days",
            deleted_count, days
        ),
        deleted_count,
    }))
}

pub async fn get_activity_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActivityLogDetailResponse>, AppError> {
    let id = parse_id(&id)?;
    let record = state
        .activity_log
        .find(id)
        .await
        .map_err(AppError::storage("Failed to fetch activity log"))?
        .ok_or_else(not_found)?;

    let mut responses = list_response(&state, vec![record]).await?.data;
    let data = responses.pop().ok_or_else(not_found)?;
    Ok(Json(ActivityLogDetailResponse {
        success: true,
        data,
    }))
}

pub async fn delete_activity_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let id = parse_id(&id)?;
    let deleted = state
        .activity_log
        .delete(id)
        .await
        .map_err(AppError::storage("Failed to delete activity log"))?;
    if !deleted {
        return Err(not_found());
    }

    Ok(Json(MessageResponse {
        success: true,
        message: "Activity log deleted successfully".into(),
    }))
}

/// Records a client-initiated action, credited to the authenticated user.
pub async fn record_activity(
    State(state): State<AppState>,
    Extension(logger): Extension<ActivityLogService>,
    Json(payload): Json<RecordActivityPayload>,
) -> Result<(StatusCode, Json<ActivityLogDetailResponse>), AppError> {
    payload.validate()?;
    let description = payload.description.trim();
    if description.is_empty() {
        return Err(AppError::BadRequest("`description` must not be blank".into()));
    }
    let subject = match (payload.subject_type.as_deref(), payload.subject_id) {
        (Some(kind), Some(id)) => Some(EntityRef::new(parse_kind(kind)?, id)),
        (None, None) => None,
        _ => {
            return Err(AppError::BadRequest(
                "`subject_type` and `subject_id` must be provided together".into(),
            ))
        }
    };
    let log_name = payload.log_name.as_deref().unwrap_or(LOG_NAME_DEFAULT);

    let record = logger
        .log(
            description,
            subject.as_ref(),
            payload.properties.unwrap_or_default(),
            log_name,
        )
        .await
        .map_err(AppError::storage("Failed to record activity"))?;

    let mut responses = list_response(&state, vec![record]).await?.data;
    let data = responses.pop().ok_or_else(not_found)?;
    Ok((
        StatusCode::CREATED,
        Json(ActivityLogDetailResponse {
            success: true,
            data,
        }),
    ))
}

async fn list_response(
    state: &AppState,
    records: Vec<ActivityRecord>,
) -> Result<ActivityLogListResponse, AppError> {
    let references: Vec<&EntityRef> = records
        .iter()
        .flat_map(|record| record.subject.iter().chain(record.causer.iter()))
        .collect();
    let resolved = entity::resolve_all(state.entities.as_ref(), references)
        .await
        .map_err(AppError::storage("Failed to resolve activity references"))?;

    let data: Vec<ActivityLogResponse> = records
        .into_iter()
        .map(|record| ActivityLogResponse::from_record(record, &resolved))
        .collect();
    Ok(ActivityLogListResponse {
        success: true,
        count: data.len(),
        data,
    })
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .clamp(1, MAX_ACTIVITY_LIMIT)
}

fn build_filters(q: ActivityLogListQuery) -> Result<ActivityLogFilters, AppError> {
    let subject_type = normalize_filter(q.subject_type)
        .map(|value| parse_kind(&value))
        .transpose()?;
    Ok(ActivityLogFilters {
        log_name: normalize_filter(q.log_name),
        causer_type: None,
        causer_id: normalize_filter(q.causer_id),
        subject_type,
        subject_id: normalize_filter(q.subject_id),
    })
}

fn normalize_filter(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_kind(raw: &str) -> Result<EntityKind, AppError> {
    EntityKind::from_str(raw).map_err(|err| AppError::BadRequest(err.to_string()))
}

fn parse_id(raw: &str) -> Result<ActivityLogId, AppError> {
    ActivityLogId::from_str(raw).map_err(|_| AppError::BadRequest("Invalid activity log ID".into()))
}

fn not_found() -> AppError {
    AppError::NotFound("Activity log not found".into())
}
