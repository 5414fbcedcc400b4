//! Authentication extractors.
//!
//! Every `/v1` request comes from a trusted frontend holding the service API
//! key. The frontend names the acting persona in `x-persona-id`; the
//! extractor turns both into the [`RequestContext`] passed to the backend.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use cdedb_core::{PersonaId, RequestContext};

use crate::error::ApiError;
use crate::state::AppState;

/// An authenticated frontend request.
#[derive(Debug, Clone)]
pub struct Caller {
    /// Calling service name (for audit logging).
    pub service_name: String,
    /// Context for backend operations: acting persona and request time.
    pub ctx: RequestContext,
}

impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let api_key = parts
                .headers
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
                .ok_or(ApiError::Unauthorized)?;

            let expected_key = state
                .config
                .service_api_key
                .as_ref()
                .ok_or(ApiError::Unauthorized)?;

            if api_key != expected_key {
                return Err(ApiError::Unauthorized);
            }

            let service_name = parts
                .headers
                .get("x-service-name")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string();

            let submitted_by = parts
                .headers
                .get("x-persona-id")
                .map(|v| {
                    v.to_str()
                        .ok()
                        .and_then(|s| s.trim().parse::<PersonaId>().ok())
                        .ok_or_else(|| ApiError::BadRequest("invalid x-persona-id header".into()))
                })
                .transpose()?;

            let mut ctx = RequestContext::new(submitted_by);
            if let Some(locale) = parts
                .headers
                .get("accept-language")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split([',', ';', '-']).next())
                .map(str::trim)
                .filter(|l| !l.is_empty())
            {
                ctx = ctx.with_locale(locale);
            }

            tracing::debug!(
                request_id = %ctx.request_id,
                service = %service_name,
                submitted_by = ?ctx.submitted_by,
                "Request authenticated"
            );

            Ok(Caller { service_name, ctx })
        })
    }
}
