//! HTTP server for the control API.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

use super::v0;
use crate::api_client::types::AlarmView;
use crate::endpoint::EndpointHandle;
use crate::error::Result;
use crate::tracing::prelude::*;

#[derive(OpenApi)]
#[openapi(info(title = "fitalarm", description = "Alarm coordination control API"))]
struct ApiDoc;

/// State shared by all handlers.
#[derive(Debug, Clone)]
pub struct SharedState {
    pub endpoint: EndpointHandle,
}

impl SharedState {
    pub fn new(endpoint: EndpointHandle) -> Self {
        Self { endpoint }
    }

    pub fn alarm_view(&self) -> AlarmView {
        v0::alarm_view(&self.endpoint.status())
    }
}

/// Build the application router, including the OpenAPI document and
/// Swagger UI.
pub fn router(state: SharedState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest("/api/v0", v0::routes())
        .split_for_parts();

    router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, state: SharedState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Control API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    debug!("Control API stopped");
    Ok(())
}
