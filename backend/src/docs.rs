#![allow(dead_code)] // OpenAPI doc stubs are only referenced by utoipa macros.

use crate::{
    error::ErrorResponse,
    handlers::activity_logs::{
        ActivityLogDetailResponse, ActivityLogListQuery, ActivityLogListResponse,
        ActivityLogResponse, ActivityStatsData, ActivityStatsResponse, CleanActivityLogsResponse,
        CleanQuery, LimitQuery, MessageResponse, RecordActivityPayload,
    },
};
use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        list_activity_logs_doc,
        record_activity_doc,
        activity_log_stats_doc,
        clean_activity_logs_doc,
        subject_activity_logs_doc,
        causer_activity_logs_doc,
        log_name_activity_logs_doc,
        get_activity_log_doc,
        delete_activity_log_doc
    ),
    components(
        schemas(
            ActivityLogResponse,
            ActivityLogListResponse,
            ActivityLogDetailResponse,
            ActivityStatsData,
            ActivityStatsResponse,
            CleanActivityLogsResponse,
            MessageResponse,
            RecordActivityPayload,
            ActivityLogListQuery,
            LimitQuery,
            CleanQuery,
            ErrorResponse
        )
    ),
    modifiers(&SecuritySchemes),
    tags(
        (name = "ActivityLogs", description = "Who did what to which record, and when")
    ),
    security(("BearerAuth" = []))
)]
pub struct ApiDoc;

struct SecuritySchemes;

impl Modify for SecuritySchemes {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_default();

        let mut bearer = Http::new(HttpAuthScheme::Bearer);
        bearer.bearer_format = Some("JWT".to_string());

        components.add_security_scheme("BearerAuth", SecurityScheme::Http(bearer));
    }
}

#[utoipa::path(
    get,
    path = "/api/activity-logs",
    params(ActivityLogListQuery),
    responses(
        (status = 200, description = "Newest first, filters combined with AND", body = ActivityLogListResponse),
        (status = 400, body = ErrorResponse),
        (status = 403, body = ErrorResponse)
    ),
    tag = "ActivityLogs"
)]
fn list_activity_logs_doc() {}

#[utoipa::path(
    post,
    path = "/api/activity-logs",
    request_body = RecordActivityPayload,
    responses(
        (status = 201, description = "Recorded with the caller as causer", body = ActivityLogDetailResponse),
        (status = 400, body = ErrorResponse)
    ),
    tag = "ActivityLogs"
)]
fn record_activity_doc() {}

#[utoipa::path(
    get,
    path = "/api/activity-logs/stats",
    responses((status = 200, body = ActivityStatsResponse)),
    tag = "ActivityLogs"
)]
fn activity_log_stats_doc() {}

#[utoipa::path(
    post,
    path = "/api/activity-logs/clean",
    params(CleanQuery),
    responses(
        (status = 200, body = CleanActivityLogsResponse),
        (status = 400, body = ErrorResponse)
    ),
    tag = "ActivityLogs"
)]
fn clean_activity_logs_doc() {}

#[utoipa::path(
    get,
    path = "/api/activity-logs/subject/{subject_type}/{subject_id}",
    params(
        ("subject_type" = String, Path, description = "Entity kind, e.g. student"),
        ("subject_id" = String, Path),
        LimitQuery
    ),
    responses(
        (status = 200, body = ActivityLogListResponse),
        (status = 400, body = ErrorResponse)
    ),
    tag = "ActivityLogs"
)]
fn subject_activity_logs_doc() {}

#[utoipa::path(
    get,
    path = "/api/activity-logs/causer/{causer_id}",
    params(("causer_id" = String, Path, description = "User ID"), LimitQuery),
    responses((status = 200, body = ActivityLogListResponse)),
    tag = "ActivityLogs"
)]
fn causer_activity_logs_doc() {}

#[utoipa::path(
    get,
    path = "/api/activity-logs/log/{log_name}",
    params(("log_name" = String, Path), LimitQuery),
    responses((status = 200, body = ActivityLogListResponse)),
    tag = "ActivityLogs"
)]
fn log_name_activity_logs_doc() {}

#[utoipa::path(
    get,
    path = "/api/activity-logs/{id}",
    params(("id" = String, Path)),
    responses(
        (status = 200, body = ActivityLogDetailResponse),
        (status = 404, body = ErrorResponse)
    ),
    tag = "ActivityLogs"
)]
fn get_activity_log_doc() {}

#[utoipa::path(
    delete,
    path = "/api/activity-logs/{id}",
    params(("id" = String, Path)),
    responses(
        (status = 200, body = MessageResponse),
        (status = 404, body = ErrorResponse)
    ),
    tag = "ActivityLogs"
)]
fn delete_activity_log_doc() {}
