use std::net::SocketAddr;
use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use crate::config::AppConfig;
use crate::state::AppState;
use crate::{auth, shifts, users};

pub fn build_app(state: AppState) -> Router {
    let config = state.config.clone();
    let app = Router::new()
        .merge(auth::router())
        .route("/health", get(|| async { "ok" }))
        .nest("/api/v1",
              Router::new()
                  .merge(shifts::router())
                  .merge(users::router())
        )
        .with_state(state);
    with_middleware(app, &config)
}

/// Request deadline (408 once exceeded), CORS and request tracing.
fn with_middleware(app: Router, config: &AppConfig) -> Router {
    app.layer(TimeoutLayer::new(config.request_timeout()))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router, addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
