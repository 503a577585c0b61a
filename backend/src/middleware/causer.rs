//! Per-request causer binding for activity logging.
//!
//! Handlers pull an `ActivityLogService` out of their own request's
//! extensions. When `auth` has authenticated a user, that service is bound to
//! the user; otherwise it is the unbound service from `AppState`. The binding
//! lives and dies with the request.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{models::user::User, state::AppState};

pub async fn resolve_causer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let logger = match request.extensions().get::<User>() {
        Some(user) => {
            tracing::trace!(user_id = %user.id, "binding activity causer");
            state.activity_log.caused_by(user.as_entity_ref())
        }
        None => state.activity_log.clone(),
    };
    request.extensions_mut().insert(logger);
    next.run(request).await
}
