use axum::{extract::Request, middleware::Next, response::Response};

/// Counts every request this API serves (spec.md §9's metrics surface).
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    metrics::counter!("confplane_read_api_requests_total", 1);
    next.run(req).await
}
