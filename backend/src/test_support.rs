//! Shared fixtures for in-crate tests.

use chrono::Utc;
use std::sync::Arc;

use crate::{
    config::Config,
    models::user::{User, UserRole},
    repositories::{memory::InMemoryActivityLogStore, ActivityLogStore},
    services::ActivityLogService,
    state::AppState,
};

pub const TEST_JWT_SECRET: &str = "test-secret";

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/unused".into(),
        jwt_secret: TEST_JWT_SECRET.into(),
        time_zone: chrono_tz::UTC,
        cors_allow_origins: vec!["http://localhost:5173".into()],
        server_port: 3000,
        activity_log_retention_days: 90,
    }
}

/// State backed by one in-memory store that serves both records and entity
/// lookups.
pub fn memory_state() -> (AppState, Arc<InMemoryActivityLogStore>) {
    let store = Arc::new(InMemoryActivityLogStore::new());
    let state = AppState::new(
        test_config(),
        ActivityLogService::new(store.clone()),
        store.clone(),
    );
    (state, store)
}

/// State over an arbitrary record store; entity lookups resolve nothing.
pub fn state_with_store(store: Arc<dyn ActivityLogStore>) -> AppState {
    AppState::new(
        test_config(),
        ActivityLogService::new(store),
        Arc::new(InMemoryActivityLogStore::new()),
    )
}

pub fn user(role: UserRole) -> User {
    let now = Utc::now();
    let id = match role {
        UserRole::Admin => "9b1f0c52-0000-4000-8000-00000000000a",
        UserRole::Staff => "9b1f0c52-0000-4000-8000-00000000000b",
        UserRole::Student => "9b1f0c52-0000-4000-8000-00000000000c",
    };
    User {
        id: id.into(),
        institute_id: None,
        username: format!("{}-user", role.as_str()),
        full_name: format!("Test {}", role.as_str()),
        email: format!("{}@school.test", role.as_str()),
        role,
        created_at: now,
        updated_at: now,
    }
}
