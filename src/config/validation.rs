//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check backend-specific requirements
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, StorageBackendKind};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

fn check_socket_addr(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{}' is not a valid socket address", value),
        ));
    }
}

fn check_not_blank(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.trim().is_empty() {
        errors.push(ValidationError::new(field, "must not be blank"));
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_socket_addr("listener.bind_address", &config.listener.bind_address, &mut errors);

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be greater than 0"));
    }

    check_not_blank("storage.default_bucket", &config.storage.default_bucket, &mut errors);
    match config.storage.backend {
        StorageBackendKind::Memory => {}
        StorageBackendKind::Filesystem => {
            check_not_blank("storage.root", &config.storage.root, &mut errors);
        }
        StorageBackendKind::S3 => {
            let s3 = &config.storage.s3;
            check_not_blank("storage.s3.endpoint", &s3.endpoint, &mut errors);
            check_not_blank("storage.s3.region", &s3.region, &mut errors);
            check_not_blank("storage.s3.access_key", &s3.access_key, &mut errors);
            check_not_blank("storage.s3.secret_key", &s3.secret_key, &mut errors);
        }
    }

    let obs = &config.observability;
    check_not_blank("observability.application", &obs.application, &mut errors);
    if !LOG_LEVELS.contains(&obs.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("'{}' is not one of {}", obs.log_level, LOG_LEVELS.join(", ")),
        ));
    }
    if obs.metrics_enabled {
        check_socket_addr("observability.metrics_address", &obs.metrics_address, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
