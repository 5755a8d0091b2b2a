//! Web shell for the floorplan signal planner.
//!
//! Binds the pure core (session state machine + render pipeline) to two
//! stacked HTML canvases and the query service. All mutable state lives in a
//! thread-local [`AppState`]; the exported functions are thin: they feed an
//! event into the session and replay the returned commands against the DOM
//! and the network.
//!
//! Expected markup: a base canvas `floorplan-canvas` (z=1, receives clicks)
//! and an overlay canvas `overlay-canvas` (z=2, `pointer-events: none`)
//! absolutely positioned on top of it.

use std::cell::RefCell;

use base64::Engine as _;
use console_error_panic_hook::set_once;
use gloo_net::http::Request;
use js_sys::Uint8Array;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;
use web_sys::{
    Blob, BlobPropertyBag, CanvasRenderingContext2d, HtmlCanvasElement, HtmlImageElement, Url,
};

use geometry::{CanonicalPoint, DisplayPoint, Extent};
use protocol::{GridPoint, PointQuery, ServiceConfig, UploadResponse};
use render::{Generation, LayerCommand, LayerKind, LayerPlan, Pipeline};
use session::{
    Command, DEFAULT_SAMPLE_COUNT, Phase, RequestSeq, Session, SessionConfig,
};

const BASE_CANVAS_ID: &str = "floorplan-canvas";
const OVERLAY_CANVAS_ID: &str = "overlay-canvas";

/// Overlay resource handles are blob object URLs; releasing one means
/// revoking it.
struct AppState {
    session: Session,
    pipeline: Pipeline<String>,
}

thread_local! {
    static STATE: RefCell<AppState> = RefCell::new(AppState {
        session: Session::new(SessionConfig::new(ServiceConfig::new(
            "http://localhost:8000",
        ))),
        pipeline: Pipeline::new(),
    });
}

fn with_state<R>(f: impl FnOnce(&mut AppState) -> R) -> R {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

#[wasm_bindgen(start)]
pub fn start() {
    set_once();
}

/// Points the session at a service and replaces any previous session.
///
/// `timeout_ms == 0` keeps the default query timeout.
#[wasm_bindgen]
pub fn configure(base_url: String, timeout_ms: u32) {
    let released = with_state(|app| {
        let mut config = SessionConfig::new(ServiceConfig::new(base_url));
        if timeout_ms > 0 {
            config.query_timeout_ms = timeout_ms;
        }
        app.session = Session::new(config);
        app.pipeline.teardown()
    });
    release(released);
}

/// Uploads floorplan bytes to the service and installs the result.
#[wasm_bindgen]
pub fn upload_floorplan(bytes: Vec<u8>) {
    if with_state(|app| app.session.is_busy()) {
        return;
    }
    spawn_local(async move {
        let url = with_state(|app| app.session.config().service.upload_url());
        let cmds = match send_upload(&url, &bytes).await {
            Ok(resp) => match resp.decode_image() {
                Ok(image) => {
                    let canonical = resp.canonical_extent();
                    match with_state(|app| app.session.upload_succeeded(image, canonical)) {
                        Ok(cmds) => cmds,
                        Err(err) => with_state(|app| app.session.upload_failed(err.to_string())),
                    }
                }
                Err(err) => with_state(|app| app.session.upload_failed(err.to_string())),
            },
            Err(detail) => with_state(|app| app.session.upload_failed(detail)),
        };
        run_commands(cmds);
    });
}

/// A click on the base canvas, in canvas-local display coordinates.
#[wasm_bindgen]
pub fn canvas_click(x: f64, y: f64) {
    let cmds = with_state(|app| app.session.click(DisplayPoint::new(x, y)));
    run_commands(cmds);
}

/// Asks the service for the best transmitter placement.
///
/// `sample_count == 0` uses the default.
#[wasm_bindgen]
pub fn find_best_point(sample_count: u32) {
    let sample_count = if sample_count == 0 {
        DEFAULT_SAMPLE_COUNT
    } else {
        sample_count
    };
    let cmds = with_state(|app| app.session.find_best(sample_count));
    run_commands(cmds);
}

/// Clears the shown result, keeping the floorplan.
#[wasm_bindgen]
pub fn reset_view() {
    let cmds = with_state(|app| app.session.reset());
    run_commands(cmds);
}

/// Releases the live overlay resource. Call when removing the component.
#[wasm_bindgen]
pub fn teardown() {
    let released = with_state(|app| app.pipeline.teardown());
    release(released);
}

/// Whether a request is in flight; the page disables its triggers on this.
#[wasm_bindgen]
pub fn is_busy() -> bool {
    with_state(|app| app.session.is_busy())
}

#[wasm_bindgen]
pub fn phase_name() -> String {
    let phase = with_state(|app| app.session.phase());
    match phase {
        Phase::Empty => "empty",
        Phase::Ready => "ready",
        Phase::Querying => "querying",
        Phase::Displayed => "displayed",
    }
    .to_string()
}

fn run_commands(cmds: Vec<Command>) {
    for cmd in cmds {
        match cmd {
            Command::SendPointQuery { seq, point } => send_point_query(seq, point),
            Command::SendBestPointQuery { seq, sample_count } => {
                send_best_point_query(seq, sample_count)
            }
            Command::RedrawBase => redraw_base(),
            Command::InstallOverlay { image, marker } => install_overlay(&image, marker),
            Command::ClearOverlay => clear_overlay(),
            Command::Notify { error } => notify(&error.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Network

fn send_point_query(seq: RequestSeq, point: CanonicalPoint) {
    schedule_timeout(seq);
    spawn_local(async move {
        let url = with_state(|app| app.session.config().service.point_query_url());
        let cmds = match fetch_field(&url, point).await {
            Ok(image) => with_state(|app| app.session.point_query_succeeded(seq, image)),
            Err(detail) => with_state(|app| app.session.query_failed(seq, detail)),
        };
        run_commands(cmds);
    });
}

fn send_best_point_query(seq: RequestSeq, sample_count: u32) {
    schedule_timeout(seq);
    spawn_local(async move {
        let url = with_state(|app| app.session.config().service.best_point_url(sample_count));
        let cmds = match fetch_best_point(&url).await {
            Ok(best) => with_state(|app| app.session.best_point_succeeded(seq, best)),
            Err(detail) => with_state(|app| app.session.query_failed(seq, detail)),
        };
        run_commands(cmds);
    });
}

async fn send_upload(url: &str, bytes: &[u8]) -> Result<UploadResponse, String> {
    let resp = Request::post(url)
        .header("Content-Type", "application/octet-stream")
        .body(Uint8Array::from(bytes))
        .map_err(|e| e.to_string())?
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let text = resp.text().await.unwrap_or_default();
    if !resp.ok() {
        return Err(protocol::error_detail(&text, "upload failed"));
    }
    protocol::parse_upload_response(&text).map_err(|e| e.to_string())
}

async fn fetch_field(url: &str, point: CanonicalPoint) -> Result<Vec<u8>, String> {
    let resp = Request::post(url)
        .json(&PointQuery {
            x: point.col,
            y: point.row,
        })
        .map_err(|e| e.to_string())?
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !resp.ok() {
        let text = resp.text().await.unwrap_or_default();
        return Err(protocol::error_detail(&text, "query failed"));
    }
    resp.binary().await.map_err(|e| e.to_string())
}

async fn fetch_best_point(url: &str) -> Result<GridPoint, String> {
    let resp = Request::post(url)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let text = resp.text().await.unwrap_or_default();
    if !resp.ok() {
        return Err(protocol::error_detail(&text, "best-point search failed"));
    }
    protocol::parse_best_point_response(&text)
        .map(|r| r.best_point)
        .map_err(|e| e.to_string())
}

/// Bounds a hung request: when the timer fires first, the session reverts to
/// its previous state and the late response is suppressed by its stale
/// sequence number.
fn schedule_timeout(seq: RequestSeq) {
    let timeout_ms = with_state(|app| app.session.config().query_timeout_ms);
    let Some(window) = web_sys::window() else {
        return;
    };
    let callback = Closure::once_into_js(move || {
        let cmds = with_state(|app| app.session.timeout_expired(seq));
        run_commands(cmds);
    });
    let _ = window.set_timeout_with_callback_and_timeout_and_arguments_0(
        callback.unchecked_ref(),
        timeout_ms as i32,
    );
}

// ---------------------------------------------------------------------------
// Rendering

fn redraw_base() {
    let Some((image, display)) = with_state(|app| {
        app.session
            .floorplan()
            .map(|plan| (plan.image.clone(), plan.display))
    }) else {
        return;
    };
    let plan = with_state(|app| app.pipeline.base_plan(display));
    let src = format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&image)
    );
    execute_plan(BASE_CANVAS_ID, plan, Some(src));
}

fn install_overlay(image: &[u8], marker: CanonicalPoint) {
    let Some(src) = make_object_url(image) else {
        notify("failed to prepare the overlay image");
        return;
    };
    let (released, plan) = with_state(|app| {
        let released = app.pipeline.install_overlay(src.clone());
        let plan = app.session.floorplan().and_then(|p| {
            app.pipeline
                .overlay_plan(Some(marker), p.canonical, p.display)
                .ok()
        });
        (released, plan)
    });
    release(released);
    if let Some(plan) = plan {
        execute_plan(OVERLAY_CANVAS_ID, plan, Some(src));
    }
}

fn clear_overlay() {
    let (released, plan) = with_state(|app| {
        let released = app.pipeline.clear_overlay();
        let plan = app.session.floorplan().and_then(|p| {
            app.pipeline.overlay_plan(None, p.canonical, p.display).ok()
        });
        (released, plan)
    });
    release(released);
    if let Some(plan) = plan {
        execute_plan(OVERLAY_CANVAS_ID, plan, None);
    }
}

/// Revokes a superseded overlay object URL.
fn release(url: Option<String>) {
    if let Some(url) = url {
        let _ = Url::revoke_object_url(&url);
    }
}

fn make_object_url(bytes: &[u8]) -> Option<String> {
    let parts = js_sys::Array::new();
    parts.push(&Uint8Array::from(bytes));
    let options = BlobPropertyBag::new();
    options.set_type("image/png");
    let blob = Blob::new_with_u8_array_sequence_and_options(&parts, &options).ok()?;
    Url::create_object_url_with_blob(&blob).ok()
}

/// Replays a layer plan onto its canvas.
///
/// Commands up to the first `DrawImage` run synchronously; the image draw
/// and everything after it run in the image's decode callback, gated on the
/// plan's generation, so a marker is painted on top of its overlay and a
/// decode that finishes after its overlay was replaced draws nothing.
fn execute_plan(canvas_id: &str, plan: LayerPlan, image_src: Option<String>) {
    let Some(ctx) = context_2d(canvas_id) else {
        return;
    };
    let mut commands = plan.commands.into_iter();
    while let Some(cmd) = commands.next() {
        match cmd {
            LayerCommand::Resize(extent) => resize(&ctx, extent),
            LayerCommand::FillCircle {
                center,
                radius,
                color,
            } => fill_circle(&ctx, center, radius, color),
            LayerCommand::DrawImage { opacity } => {
                let Some(src) = image_src else {
                    return;
                };
                let rest: Vec<LayerCommand> = commands.collect();
                draw_image_then(ctx, plan.layer, plan.generation, src, opacity, rest);
                return;
            }
        }
    }
}

fn draw_image_then(
    ctx: CanvasRenderingContext2d,
    layer: LayerKind,
    generation: Generation,
    src: String,
    opacity: f64,
    rest: Vec<LayerCommand>,
) {
    let Ok(image) = HtmlImageElement::new() else {
        return;
    };
    let drawn = image.clone();
    let onload = Closure::once_into_js(move || {
        if !with_state(|app| app.pipeline.is_current(layer, generation)) {
            return;
        }
        let Some(canvas) = ctx.canvas() else {
            return;
        };
        let (w, h) = (canvas.width() as f64, canvas.height() as f64);

        ctx.set_global_alpha(opacity);
        let _ = ctx.draw_image_with_html_image_element_and_dw_and_dh(&drawn, 0.0, 0.0, w, h);
        ctx.set_global_alpha(1.0);

        for cmd in rest {
            match cmd {
                LayerCommand::Resize(extent) => resize(&ctx, extent),
                LayerCommand::FillCircle {
                    center,
                    radius,
                    color,
                } => fill_circle(&ctx, center, radius, color),
                // A plan holds at most one image draw.
                LayerCommand::DrawImage { .. } => {}
            }
        }
    });
    image.set_onload(Some(onload.unchecked_ref()));
    image.set_src(&src);
}

fn resize(ctx: &CanvasRenderingContext2d, extent: Extent) {
    if let Some(canvas) = ctx.canvas() {
        canvas.set_width(extent.width);
        canvas.set_height(extent.height);
    }
    ctx.clear_rect(0.0, 0.0, extent.width as f64, extent.height as f64);
}

fn fill_circle(ctx: &CanvasRenderingContext2d, center: DisplayPoint, radius: f64, color: &str) {
    ctx.begin_path();
    let _ = ctx.arc(center.x, center.y, radius, 0.0, std::f64::consts::TAU);
    ctx_set_fill_style(ctx, color);
    ctx.fill();
}

fn ctx_set_fill_style(ctx: &CanvasRenderingContext2d, value: &str) {
    let _ = js_sys::Reflect::set(
        ctx.as_ref(),
        &JsValue::from_str("fillStyle"),
        &JsValue::from_str(value),
    );
}

fn context_2d(canvas_id: &str) -> Option<CanvasRenderingContext2d> {
    let document = web_sys::window()?.document()?;
    let canvas = document
        .get_element_by_id(canvas_id)?
        .dyn_into::<HtmlCanvasElement>()
        .ok()?;
    let ctx = canvas.get_context("2d").ok()??;
    ctx.dyn_into::<CanvasRenderingContext2d>().ok()
}

fn notify(message: &str) {
    web_sys::console::warn_1(&JsValue::from_str(message));
    if let Some(window) = web_sys::window() {
        let _ = window.alert_with_message(message);
    }
}
