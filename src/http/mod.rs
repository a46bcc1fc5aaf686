use std::sync::Arc;

use actix_web::http::header::HeaderMap;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::domain::LifecycleError;
use crate::lifecycle::OrderLifecycle;

// ============================================================================
// HTTP Transport
// ============================================================================
//
// Thin collaborator around the core: header extraction, boundary
// validation, and mapping of the typed lifecycle outcomes onto protocol
// status codes. No business logic lives here.
//
//   POST  /api/v1/orders               (X-Tenant-Id, Idempotency-Key)
//   PATCH /api/v1/orders/{id}/confirm  (X-Tenant-Id, If-Match)
//   POST  /api/v1/orders/{id}/close    (X-Tenant-Id)
//   GET   /api/v1/orders               (X-Tenant-Id, ?limit&cursor)
//   GET   /health
//
// ============================================================================

pub struct AppState {
    pub lifecycle: Arc<OrderLifecycle>,
}

pub async fn start_api_server(
    lifecycle: Arc<OrderLifecycle>,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!("Starting API server on http://0.0.0.0:{}", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(AppState {
                lifecycle: lifecycle.clone(),
            }))
            .route("/api/v1/orders", web::post().to(create_order))
            .route("/api/v1/orders", web::get().to(list_orders))
            .route("/api/v1/orders/{id}/confirm", web::patch().to(confirm_order))
            .route("/api/v1/orders/{id}/close", web::post().to(close_order))
            .route("/health", web::get().to(health))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmOrderBody {
    pub total_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

async fn create_order(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: Option<web::Json<serde_json::Value>>,
) -> HttpResponse {
    let ctx = request_context(req.headers());
    let tenant_id = match require_header(req.headers(), "x-tenant-id", "X-Tenant-Id required") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let key = match require_header(
        req.headers(),
        "idempotency-key",
        "Idempotency-Key header required",
    ) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let body = body
        .map(|json| json.into_inner())
        .unwrap_or_else(|| serde_json::json!({}));

    match state
        .lifecycle
        .create_draft(&ctx, &tenant_id, &key, &body)
        .await
    {
        Ok(order) => ok_json(&ctx, serde_json::to_value(order).unwrap_or_default()),
        Err(err) => error_response(&ctx, &err, req.path()),
    }
}

async fn confirm_order(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<ConfirmOrderBody>,
) -> HttpResponse {
    let ctx = request_context(req.headers());
    let tenant_id = match require_header(req.headers(), "x-tenant-id", "X-Tenant-Id required") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if body.total_cents < 1 {
        return error_response(
            &ctx,
            &LifecycleError::validation("totalCents must be a positive integer"),
            req.path(),
        );
    }

    // If-Match arrives as an entity tag; strip quotes and parse. Anything
    // unparsable becomes 0, which the core classifies as a Conflict.
    let expected_version = header_value(req.headers(), "if-match")
        .map(|v| v.replace('"', ""))
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);

    match state
        .lifecycle
        .confirm(
            &ctx,
            path.into_inner(),
            &tenant_id,
            expected_version,
            body.total_cents,
        )
        .await
    {
        Ok(order) => ok_json(&ctx, serde_json::to_value(order).unwrap_or_default()),
        Err(err) => error_response(&ctx, &err, req.path()),
    }
}

async fn close_order(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> HttpResponse {
    let ctx = request_context(req.headers());
    let tenant_id = match require_header(req.headers(), "x-tenant-id", "X-Tenant-Id required") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match state
        .lifecycle
        .close(&ctx, path.into_inner(), &tenant_id)
        .await
    {
        Ok(order) => ok_json(&ctx, serde_json::to_value(order).unwrap_or_default()),
        Err(err) => error_response(&ctx, &err, req.path()),
    }
}

async fn list_orders(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> HttpResponse {
    let ctx = request_context(req.headers());
    let tenant_id = match require_header(req.headers(), "x-tenant-id", "X-Tenant-Id required") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match state
        .lifecycle
        .list(&ctx, &tenant_id, query.limit, query.cursor.as_deref())
        .await
    {
        Ok(page) => ok_json(&ctx, serde_json::to_value(page).unwrap_or_default()),
        Err(err) => error_response(&ctx, &err, req.path()),
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "orders-service"
    }))
}

// ============================================================================
// Header helpers and error mapping
// ============================================================================

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    match header_value(headers, "x-request-id") {
        Some(trace_id) => RequestContext::with_trace_id(trace_id),
        None => RequestContext::new(),
    }
}

fn require_header(
    headers: &HeaderMap,
    name: &str,
    message: &str,
) -> Result<String, HttpResponse> {
    match header_value(headers, name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => {
            let ctx = request_context(headers);
            Err(error_response(
                &ctx,
                &LifecycleError::validation(message),
                "",
            ))
        }
    }
}

fn ok_json(ctx: &RequestContext, body: serde_json::Value) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header(("X-Request-ID", ctx.trace_id.clone()))
        .json(body)
}

fn error_response(ctx: &RequestContext, err: &LifecycleError, path: &str) -> HttpResponse {
    let (status, code) = match err {
        LifecycleError::Validation(_) => (actix_web::http::StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        LifecycleError::NotFound => (actix_web::http::StatusCode::NOT_FOUND, "NOT_FOUND"),
        LifecycleError::Conflict(_) => (actix_web::http::StatusCode::CONFLICT, "CONFLICT"),
        LifecycleError::Internal(_) => (
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
        ),
    };

    // Internal details stay in the logs, not on the wire.
    let message = match err {
        LifecycleError::Internal(source) => {
            tracing::error!(trace_id = %ctx.trace_id, error = %source, "Internal error");
            "Internal server error".to_string()
        }
        other => other.to_string(),
    };

    HttpResponse::build(status)
        .insert_header(("X-Request-ID", ctx.trace_id.clone()))
        .json(serde_json::json!({
            "error": {
                "code": code,
                "message": message,
                "timestamp": Utc::now().to_rfc3339(),
                "path": path,
            }
        }))
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping_statuses() {
        let ctx = RequestContext::new();
        let cases = [
            (LifecycleError::validation("bad"), 400),
            (LifecycleError::NotFound, 404),
            (LifecycleError::conflict("Version mismatch"), 409),
            (
                LifecycleError::Internal(anyhow::anyhow!("db down")),
                500,
            ),
        ];

        for (err, expected) in cases {
            let resp = error_response(&ctx, &err, "/api/v1/orders");
            assert_eq!(resp.status().as_u16(), expected);
        }
    }

    #[test]
    fn test_confirm_body_accepts_camel_case() {
        let body: ConfirmOrderBody = serde_json::from_str(r#"{"totalCents": 500}"#).unwrap();
        assert_eq!(body.total_cents, 500);
    }
}
