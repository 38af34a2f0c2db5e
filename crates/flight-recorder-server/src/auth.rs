// crates/flight-recorder-server/src/auth.rs
// ============================================================================
// Module: Bearer Authentication
// Description: Fail-closed bearer token enforcement for API routes.
// Purpose: Resolve an authenticated actor context for every request.
// Dependencies: axum, flight-recorder-config, flight-recorder-core
// ============================================================================

//! ## Overview
//! When auth is disabled every caller resolves to the anonymous local
//! actor. When enabled, requests must carry `Authorization: Bearer <token>`
//! with the configured token; a missing header is `AUTH_REQUIRED` and a
//! wrong token is `AUTH_FORBIDDEN`. The resolved actor feeds audit
//! attribution for replay actions.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use flight_recorder_config::Settings;
use flight_recorder_core::AuditActor;
use flight_recorder_core::RecorderError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Bearer scheme prefix in the authorization header.
const BEARER_PREFIX: &str = "Bearer ";

// ============================================================================
// SECTION: Enforcement
// ============================================================================

/// Resolves the caller's actor context, enforcing bearer auth when enabled.
///
/// # Errors
///
/// Returns [`RecorderError::AuthRequired`] when no bearer token is present
/// and [`RecorderError::AuthForbidden`] when the token does not match.
pub fn require_auth(settings: &Settings, headers: &HeaderMap) -> Result<AuditActor, RecorderError> {
    if !settings.auth_enabled {
        return Ok(AuditActor {
            actor_id: "anonymous".to_string(),
            actor_type: "local".to_string(),
        });
    }

    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let Some(token) = header.strip_prefix(BEARER_PREFIX) else {
        return Err(RecorderError::AuthRequired {
            message: "Authorization token is required".to_string(),
        });
    };

    if token != settings.auth_token {
        return Err(RecorderError::AuthForbidden {
            message: "Authorization token is invalid".to_string(),
        });
    }

    Ok(AuditActor {
        actor_id: "token_user".to_string(),
        actor_type: "token".to_string(),
    })
}
