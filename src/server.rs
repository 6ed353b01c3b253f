//! Web server for the corner editor API

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::editor::{quad_to_handles, CornerHandle, Editor};
use crate::error::RasterError;
use crate::geometry::{is_point_in_quad, Corner, Point, Quad};
use crate::overlay::draw_quad_overlay;
use crate::raster::{Encoding, RasterImage};
use crate::solver::solve_uv;

/// Largest accepted source upload
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Shared application state
pub struct AppState {
    /// Configuration (quad is written back on save)
    pub config: Arc<RwLock<Config>>,
    /// Path to save configuration
    config_path: PathBuf,
    pub editor: Editor,
}

impl AppState {
    pub fn new(config: Arc<RwLock<Config>>, config_path: PathBuf) -> Self {
        let editor = Editor::new(&config.read());
        Self {
            config,
            config_path,
            editor,
        }
    }

    /// Store the current quad in the config file
    pub fn save_config(&self) -> Result<()> {
        let mut config = self.config.write();
        config.quad = Some(self.editor.quad());
        config.save(&self.config_path)
    }

    fn encoding(&self) -> Encoding {
        self.config.read().export.encoding()
    }
}

/// Re-render off the async runtime. A pass overtaken by a newer edit is not
/// an error.
async fn rerender(state: &Arc<AppState>) -> Result<(), StatusCode> {
    let state = state.clone();
    match tokio::task::spawn_blocking(move || state.editor.render()).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            error!("Render failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => {
            error!("Render task panicked: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/quad", get(get_quad).put(set_quad))
        .route("/api/quad/corner/:corner", post(move_corner))
        .route("/api/quad/reset", post(reset_quad))
        .route("/api/quad/save", post(save_quad))
        .route("/api/canvas", post(resize_canvas))
        .route("/api/uv", get(lookup_uv))
        .route("/api/source", post(upload_source))
        .route("/api/preview", get(get_preview))
        .route("/api/preview/overlay", get(get_overlay))
        .route("/api/export", get(get_export))
        .route("/api/info", get(get_info))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Run the web server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Web server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// API response for quad state
#[derive(Serialize)]
struct QuadResponse {
    revision: u64,
    width: u32,
    height: u32,
    has_source: bool,
    corners: Vec<CornerHandle>,
    quad: Quad,
}

fn quad_response(state: &AppState) -> Json<QuadResponse> {
    let quad = state.editor.quad();
    let (width, height) = state.editor.canvas_size();
    Json(QuadResponse {
        revision: state.editor.revision(),
        width,
        height,
        has_source: state.editor.has_source(),
        corners: quad_to_handles(&quad),
        quad,
    })
}

/// Get current quad
async fn get_quad(State(state): State<Arc<AppState>>) -> Json<QuadResponse> {
    quad_response(&state)
}

/// Replace all four corners
async fn set_quad(State(state): State<Arc<AppState>>, Json(quad): Json<Quad>) -> Response {
    state.editor.set_quad(quad);
    match rerender(&state).await {
        Ok(()) => quad_response(&state).into_response(),
        Err(status) => status.into_response(),
    }
}

#[derive(Deserialize)]
struct PointUpdate {
    x: f64,
    y: f64,
}

/// Drag a single corner
async fn move_corner(
    State(state): State<Arc<AppState>>,
    Path(corner): Path<String>,
    Json(point): Json<PointUpdate>,
) -> Response {
    let corner: Corner = match corner.parse() {
        Ok(c) => c,
        Err(e) => {
            warn!("{}", e);
            return (StatusCode::BAD_REQUEST, e).into_response();
        }
    };

    state.editor.move_corner(corner, Point::new(point.x, point.y));
    match rerender(&state).await {
        Ok(()) => quad_response(&state).into_response(),
        Err(status) => status.into_response(),
    }
}

/// Reset the quad to the default rectangle
async fn reset_quad(State(state): State<Arc<AppState>>) -> Response {
    state.editor.reset();
    match rerender(&state).await {
        Ok(()) => quad_response(&state).into_response(),
        Err(status) => status.into_response(),
    }
}

#[derive(Deserialize)]
struct CanvasUpdate {
    width: u32,
    height: u32,
}

/// Change the canvas size; the quad resets to the default rectangle
async fn resize_canvas(State(state): State<Arc<AppState>>, Json(size): Json<CanvasUpdate>) -> Response {
    if let Err(e) = state.editor.resize(size.width, size.height) {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }
    match rerender(&state).await {
        Ok(()) => quad_response(&state).into_response(),
        Err(status) => status.into_response(),
    }
}

#[derive(Serialize)]
struct UvResponse {
    inside: bool,
    u: f64,
    v: f64,
}

/// Source coordinates a canvas point samples from
async fn lookup_uv(State(state): State<Arc<AppState>>, Query(point): Query<PointUpdate>) -> Json<UvResponse> {
    let quad = state.editor.quad();
    let point = Point::new(point.x, point.y);
    let uv = solve_uv(point, &quad);
    Json(UvResponse {
        inside: is_point_in_quad(point, &quad),
        u: uv.u,
        v: uv.v,
    })
}

/// Save the quad to the config file
async fn save_quad(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.save_config() {
        Ok(_) => (StatusCode::OK, "Saved").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Serialize)]
struct SourceResponse {
    revision: u64,
    width: u32,
    height: u32,
}

/// Upload a new source image (raw PNG/JPEG bytes)
async fn upload_source(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    // Decoding and orientation both run off the async runtime
    let installer = state.clone();
    let installed = tokio::task::spawn_blocking(move || {
        let source = RasterImage::decode(&body)?;
        let (width, height) = (source.width(), source.height());
        let revision = installer.editor.set_source(source);
        Ok::<_, RasterError>((revision, width, height))
    })
    .await;

    let (revision, width, height) = match installed {
        Ok(Ok(installed)) => installed,
        Ok(Err(e)) => {
            warn!("Rejected upload: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
        Err(e) => {
            error!("Decode task panicked: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Err(status) = rerender(&state).await {
        return status.into_response();
    }

    Json(SourceResponse {
        revision,
        width,
        height,
    })
    .into_response()
}

fn png_response(image: &RasterImage) -> Response {
    match image.encode(Encoding::Png) {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Get the latest rectified raster (PNG)
async fn get_preview(State(state): State<Arc<AppState>>) -> Response {
    match state.editor.committed() {
        Some(committed) => png_response(&committed.image),
        None => (StatusCode::SERVICE_UNAVAILABLE, "No render available").into_response(),
    }
}

/// Get the latest raster with the quad drawn over it (PNG)
async fn get_overlay(State(state): State<Arc<AppState>>) -> Response {
    let Some(committed) = state.editor.committed() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "No render available").into_response();
    };

    match draw_quad_overlay(&committed.image, &committed.quad) {
        Ok(image) => png_response(&image),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Serialize)]
struct ExportResponse {
    revision: u64,
    width: u32,
    height: u32,
    /// Pixels that fell inside the quad
    inside_pixels: u64,
    data_uri: String,
}

/// Export the latest raster as a data URI
async fn get_export(State(state): State<Arc<AppState>>) -> Response {
    let Some(committed) = state.editor.committed() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "No render available").into_response();
    };

    match committed.image.to_data_uri(state.encoding()) {
        Ok(data_uri) => Json(ExportResponse {
            revision: committed.revision,
            width: committed.image.width(),
            height: committed.image.height(),
            inside_pixels: committed.stats.inside,
            data_uri,
        })
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// System information response
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    width: u32,
    height: u32,
    parallel: bool,
    revision: u64,
}

/// Get system information
async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let (width, height) = state.editor.canvas_size();
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        width,
        height,
        parallel: state.editor.is_parallel(),
        revision: state.editor.revision(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state(name: &str) -> Arc<AppState> {
        let mut config = Config::default();
        config.canvas.width = 24;
        config.canvas.height = 16;
        config.canvas.margin = 4.0;
        let path = std::env::temp_dir()
            .join(format!("drawerfit-server-{}-{}", std::process::id(), name))
            .join("config.toml");
        Arc::new(AppState::new(Arc::new(RwLock::new(config)), path))
    }

    async fn send(state: &Arc<AppState>, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn png_bytes(rgba: [u8; 4]) -> Vec<u8> {
        RasterImage::filled(6, 4, rgba).unwrap().encode(Encoding::Png).unwrap()
    }

    #[tokio::test]
    async fn test_get_quad() {
        let state = test_state("get");
        let (status, body) = send(&state, Request::get("/api/quad").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["width"], 24);
        assert_eq!(json["revision"], 0);
        assert_eq!(json["has_source"], false);
        assert_eq!(json["corners"].as_array().unwrap().len(), 4);
        assert_eq!(json["quad"]["top_left"]["x"], 4.0);
    }

    #[tokio::test]
    async fn test_preview_unavailable_before_upload() {
        let state = test_state("empty");
        let (status, _) = send(&state, Request::get("/api/preview").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_upload_then_preview_and_export() {
        let state = test_state("upload");
        let upload = Request::post("/api/source")
            .body(Body::from(png_bytes([0, 0, 255, 255])))
            .unwrap();
        let (status, body) = send(&state, upload).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["width"], 6);
        assert_eq!(json["revision"], 1);

        let (status, png) = send(&state, Request::get("/api/preview").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let preview = RasterImage::decode(&png).unwrap();
        assert_eq!((preview.width(), preview.height()), (24, 16));
        assert_eq!(preview.pixel(12, 8), [0, 0, 255, 255]);
        assert_eq!(preview.pixel(0, 0), [0, 0, 0, 0]);

        let (status, body) = send(&state, Request::get("/api/export").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["data_uri"].as_str().unwrap().starts_with("data:image/png;base64,"));
        // 17x9 pixels of the 4px-inset quad on a 24x16 canvas
        assert_eq!(json["inside_pixels"], 153);

        let (status, _) = send(&state, Request::get("/api/preview/overlay").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bad_upload_is_rejected() {
        let state = test_state("bad-upload");
        let req = Request::post("/api/source").body(Body::from("nope")).unwrap();
        let (status, _) = send(&state, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!state.editor.has_source());
    }

    #[tokio::test]
    async fn test_move_corner_and_reset() {
        let state = test_state("move");
        let (status, body) = send(
            &state,
            json_post("/api/quad/corner/bottom_right", serde_json::json!({"x": 18.0, "y": 11.0})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["quad"]["bottom_right"]["x"], 18.0);
        assert_eq!(json["quad"]["top_left"]["x"], 4.0);
        assert_eq!(json["revision"], 1);

        let (status, _) = send(
            &state,
            json_post("/api/quad/corner/middle", serde_json::json!({"x": 1.0, "y": 1.0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&state, Request::post("/api/quad/reset").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.editor.quad(), Quad::inset_rect(24, 16, 4.0));
    }

    #[tokio::test]
    async fn test_resize_canvas() {
        let state = test_state("resize");
        let (status, body) = send(
            &state,
            json_post("/api/canvas", serde_json::json!({"width": 60, "height": 40})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["width"], 60);
        assert_eq!(json["quad"]["bottom_right"]["x"], 56.0);

        let (status, _) = send(
            &state,
            json_post("/api/canvas", serde_json::json!({"width": 0, "height": 40})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &state,
            json_post(
                "/api/canvas",
                serde_json::json!({"width": u32::MAX, "height": u32::MAX}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.editor.canvas_size(), (60, 40));
    }

    #[tokio::test]
    async fn test_uv_lookup() {
        let state = test_state("uv");
        let (status, body) = send(&state, Request::get("/api/uv?x=12&y=8").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["inside"], true);
        assert_eq!(json["u"], 0.5);
        assert_eq!(json["v"], 0.5);

        let (_, body) = send(&state, Request::get("/api/uv?x=0&y=0").body(Body::empty()).unwrap()).await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["inside"], false);
        assert_eq!(json["u"], 0.0);
        assert_eq!(json["v"], 0.0);

        let (status, _) = send(&state, Request::get("/api/uv?x=oops&y=0").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_save_writes_quad_to_config() {
        let state = test_state("save");
        state.editor.move_corner(Corner::TopLeft, Point::new(1.0, 2.0));

        let (status, _) = send(&state, Request::post("/api/quad/save").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);

        let saved = Config::load_or_create(&state.config_path).unwrap();
        assert_eq!(saved.quad.unwrap().top_left, Point::new(1.0, 2.0));

        let _ = std::fs::remove_dir_all(state.config_path.parent().unwrap());
    }
}
