//! Actix Web server exposing the live stream, stats, notifications, and the
//! monitoring APIs.
//!
//! Runs on a dedicated thread to keep the inference hot path free from Actix
//! runtime concerns. WebSocket consumers each get their own subscription and
//! delivery task; one slow or dead consumer never affects the rest.

use std::{net::UdpSocket, sync::PoisonError};

use actix_web::{
    http::header,
    middleware::DefaultHeaders,
    web, App, HttpRequest, HttpResponse, HttpServer,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::html;
use crate::monitor::{
    broadcast::{Broadcaster, Subscription},
    data::{AlertRecord, FramePacket, Metrics, SharedFrame},
    stats::StatsStore,
    store::{NotificationLog, SnapshotLog, StoreError},
    telemetry,
};

/// Shared state backing HTTP handlers.
#[derive(Clone)]
pub(crate) struct ServerState {
    pub(crate) latest: SharedFrame,
    pub(crate) stats: StatsStore,
    pub(crate) frames: Broadcaster<std::sync::Arc<FramePacket>>,
    pub(crate) stats_feed: Broadcaster<Metrics>,
    pub(crate) alerts_feed: Broadcaster<AlertRecord>,
    pub(crate) notifications: std::sync::Arc<dyn NotificationLog>,
    pub(crate) snapshots: std::sync::Arc<dyn SnapshotLog>,
    pub(crate) port: u16,
}

#[derive(Default)]
/// Handle for the server thread.
pub(crate) struct MonitorServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl MonitorServer {
    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Spawn the server thread and return a handle that can stop it.
pub(crate) fn spawn_server(state: ServerState) -> Result<MonitorServer> {
    let port = state.port;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = telemetry::spawn_thread("monitor-http", move || {
        if let Err(err) = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(state.clone()))
                    .wrap(
                        DefaultHeaders::new()
                            .add((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
                            .add((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
                            .add((header::ACCESS_CONTROL_ALLOW_METHODS, "GET, DELETE")),
                    )
                    .route("/", web::get().to(index_route))
                    .route("/frame.jpg", web::get().to(frame_handler))
                    .route("/ws/camera", web::get().to(ws_camera))
                    .route("/ws/camera-stats", web::get().to(ws_camera_stats))
                    .route("/ws/notify", web::get().to(ws_notify))
                    .route("/api/server-info", web::get().to(server_info_handler))
                    .route("/api/health", web::get().to(health_handler))
                    .route("/api/stats", web::get().to(stats_handler))
                    .route("/api/notifications", web::get().to(list_notifications))
                    .route(
                        "/api/notifications/delete-all",
                        web::delete().to(delete_all_notifications),
                    )
                    .route(
                        "/api/notifications/delete/{id}",
                        web::delete().to(delete_notification),
                    )
                    .route("/api/images", web::get().to(list_images))
                    .route("/api/images/delete-all", web::delete().to(delete_all_images))
                    .route("/api/images/delete", web::delete().to(delete_image))
                    .route("/metrics", web::get().to(metrics_handler))
            })
            .bind(("0.0.0.0", port))?
            .run();

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        }) {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn server thread")?;
    Ok(MonitorServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(html::INDEX_HTML)
}

/// Return the latest annotated frame as a single JPEG.
async fn frame_handler(state: web::Data<ServerState>) -> HttpResponse {
    let packet = state
        .latest
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    match packet {
        Some(packet) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .body(packet.jpeg.clone()),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Shared skeleton for the three WebSocket routes: subscribe, then pump the
/// subscription into the session until either side disconnects.
async fn ws_deliver<T, F>(
    req: HttpRequest,
    body: web::Payload,
    subscription: Option<Subscription<T>>,
    mut encode: F,
) -> actix_web::Result<HttpResponse>
where
    T: 'static,
    F: FnMut(T) -> WsPayload + 'static,
{
    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, body)?;

    let Some(mut subscription) = subscription else {
        // Pipeline already ended; accept and immediately close.
        actix_web::rt::spawn(async move {
            let _ = session.close(None).await;
        });
        return Ok(response);
    };

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                produced = subscription.recv() => {
                    match produced {
                        Some(value) => {
                            let result = match encode(value) {
                                WsPayload::Binary(bytes) => session.binary(bytes).await,
                                WsPayload::Text(text) => session.text(text).await,
                            };
                            if result.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = session.close(None).await;
                            break;
                        }
                    }
                }
                message = msg_stream.recv() => {
                    match message {
                        Some(Ok(actix_ws::Message::Ping(bytes))) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(actix_ws::Message::Close(_))) | None => {
                            debug!("WebSocket consumer disconnected");
                            break;
                        }
                        Some(Err(_)) => break,
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    });

    Ok(response)
}

enum WsPayload {
    Binary(web::Bytes),
    Text(String),
}

/// Annotated frames as binary JPEG messages at the pipeline's native cadence.
async fn ws_camera(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<ServerState>,
) -> actix_web::Result<HttpResponse> {
    ws_deliver(req, body, state.frames.subscribe(), |packet| {
        WsPayload::Binary(packet.jpeg.clone())
    })
    .await
}

/// Density metrics as JSON text messages on the publisher's fixed cadence.
async fn ws_camera_stats(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<ServerState>,
) -> actix_web::Result<HttpResponse> {
    ws_deliver(req, body, state.stats_feed.subscribe(), |metrics| {
        WsPayload::Text(serde_json::to_string(&metrics).unwrap_or_else(|_| "{}".to_string()))
    })
    .await
}

/// Alert notifications as JSON text messages, pushed on dispatch.
async fn ws_notify(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<ServerState>,
) -> actix_web::Result<HttpResponse> {
    ws_deliver(req, body, state.alerts_feed.subscribe(), |record| {
        WsPayload::Text(serde_json::to_string(&record).unwrap_or_else(|_| "{}".to_string()))
    })
    .await
}

/// Address info clients use to build WebSocket URLs.
async fn server_info_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(server_info_doc(state.port))
}

fn server_info_doc(port: u16) -> serde_json::Value {
    json!({
        "ip": local_ip().unwrap_or_else(|| "127.0.0.1".to_string()),
        "port": port,
        "websockets": {
            "camera": "/ws/camera",
            "camera_stats": "/ws/camera-stats",
            "notify": "/ws/notify",
        },
    })
}

async fn health_handler(state: web::Data<ServerState>) -> HttpResponse {
    let has_frame = state
        .latest
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some();
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "streaming": has_frame,
        "stream_consumers": state.frames.consumer_count(),
    }))
}

/// Latest density reading as a one-shot JSON document.
async fn stats_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(state.stats.snapshot())
}

async fn list_notifications(state: web::Data<ServerState>) -> HttpResponse {
    match state.notifications.list() {
        Ok(entries) => HttpResponse::Ok().json(entries),
        Err(err) => store_error_response(err),
    }
}

async fn delete_all_notifications(state: web::Data<ServerState>) -> HttpResponse {
    match state.notifications.delete_all() {
        Ok(deleted) => HttpResponse::Ok().json(json!({ "deleted": deleted })),
        Err(err) => store_error_response(err),
    }
}

async fn delete_notification(
    path: web::Path<u64>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    match state.notifications.delete(path.into_inner()) {
        Ok(()) => HttpResponse::Ok().json(json!({ "deleted": 1 })),
        Err(err) => store_error_response(err),
    }
}

async fn list_images(state: web::Data<ServerState>) -> HttpResponse {
    match state.snapshots.list() {
        Ok(entries) => HttpResponse::Ok().json(entries),
        Err(err) => store_error_response(err),
    }
}

async fn delete_all_images(state: web::Data<ServerState>) -> HttpResponse {
    match state.snapshots.delete_all() {
        Ok(deleted) => HttpResponse::Ok().json(json!({ "deleted": deleted })),
        Err(err) => store_error_response(err),
    }
}

#[derive(Deserialize)]
struct ImageQuery {
    image_url: String,
}

async fn delete_image(
    query: web::Query<ImageQuery>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    match state.snapshots.delete(&query.image_url) {
        Ok(()) => HttpResponse::Ok().json(json!({ "deleted": 1 })),
        Err(err) => store_error_response(err),
    }
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not initialised"),
    }
}

fn store_error_response(err: StoreError) -> HttpResponse {
    match err {
        StoreError::NotFound => HttpResponse::NotFound().json(json!({ "error": "not found" })),
        StoreError::Unavailable(detail) => {
            error!("Store operation failed: {detail}");
            HttpResponse::ServiceUnavailable().json(json!({ "error": detail }))
        }
    }
}

/// Best-effort local address discovery; no packets are sent.
fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_info_lists_every_websocket_path() {
        let doc = server_info_doc(8000);
        assert_eq!(doc["port"], 8000);
        assert!(doc["ip"].is_string());
        assert_eq!(doc["websockets"]["camera"], "/ws/camera");
        assert_eq!(doc["websockets"]["camera_stats"], "/ws/camera-stats");
        assert_eq!(doc["websockets"]["notify"], "/ws/notify");
    }
}
