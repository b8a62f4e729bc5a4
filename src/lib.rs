pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::config::Config;
use crate::database::Store;
use crate::services::{
    assignment_service::AssignmentService,
    attempt_service::{AttemptPolicy, AttemptService},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub attempt_service: AttemptService,
    pub assignment_service: AssignmentService,
    pub jwt_secret: Arc<str>,
    pub default_duration_minutes: i32,
}

impl AppState {
    pub fn new(store: Store, config: &Config) -> Self {
        let attempt_service = AttemptService::new(
            store.clone(),
            AttemptPolicy {
                auto_finalize_expired: config.auto_finalize_expired,
            },
        );
        let assignment_service = AssignmentService::new(store);

        Self {
            attempt_service,
            assignment_service,
            jwt_secret: Arc::from(config.jwt_secret.as_str()),
            default_duration_minutes: config.default_duration_minutes,
        }
    }

    /// Same wiring with a seeded question selector, for reproducible draws.
    pub fn with_seed(store: Store, config: &Config, seed: u64) -> Self {
        Self {
            assignment_service: AssignmentService::with_seed(store.clone(), seed),
            ..Self::new(store, config)
        }
    }
}
