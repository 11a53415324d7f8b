//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{
    body::StreamBody,
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use common::protocol::CaptureSurface;
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::{controller::RunLoopController, nn::ModelLoader, sensors::CameraFactory};

const INDEX_PAGE: &str = include_str!("../resources/index.html");

/// Build the router serving the page and its controls.
pub fn app<L, F>(controller: Arc<RunLoopController<L, F>>) -> Router
where
    L: ModelLoader + Send + Sync + 'static,
    F: CameraFactory + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/start", post(start::<L, F>))
        .route("/stop", post(stop::<L, F>))
        .route("/state", get(state::<L, F>))
        .route("/stream", get(stream::<L, F>))
        .layer(Extension(controller))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

/// Start button. iPhones and iPads get a video element, everything else a canvas.
pub async fn start<L, F>(
    Extension(controller): Extension<Arc<RunLoopController<L, F>>>,
    headers: HeaderMap,
) -> Response
where
    L: ModelLoader + Send + Sync + 'static,
    F: CameraFactory + Send + Sync + 'static,
{
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let surface = CaptureSurface::for_user_agent(user_agent);

    match controller.start(surface).await {
        Ok(_) => Json(controller.state()).into_response(),
        Err(err) => {
            log::error!("Failed to start: {err:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")).into_response()
        }
    }
}

/// Stop button.
pub async fn stop<L, F>(
    Extension(controller): Extension<Arc<RunLoopController<L, F>>>,
) -> impl IntoResponse
where
    L: ModelLoader + Send + Sync + 'static,
    F: CameraFactory + Send + Sync + 'static,
{
    controller.stop().await;
    Json(controller.state())
}

/// Current page snapshot.
pub async fn state<L, F>(
    Extension(controller): Extension<Arc<RunLoopController<L, F>>>,
) -> impl IntoResponse
where
    L: ModelLoader + Send + Sync + 'static,
    F: CameraFactory + Send + Sync + 'static,
{
    Json(controller.state())
}

/// Live capture as multipart JPEG stream.
pub async fn stream<L, F>(
    Extension(controller): Extension<Arc<RunLoopController<L, F>>>,
) -> impl IntoResponse
where
    L: ModelLoader + Send + Sync + 'static,
    F: CameraFactory + Send + Sync + 'static,
{
    log::info!("Capture stream requested");

    // Lagging viewers skip frames
    let stream = BroadcastStream::new(controller.subscribe_frames())
        .filter_map(|frame| async move { frame.ok().map(Ok::<_, std::io::Error>) });

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}
