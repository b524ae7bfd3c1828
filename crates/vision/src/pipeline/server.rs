//! Actix Web server exposing the MJPEG stream, status, and detection APIs.
//!
//! The server runs on a dedicated thread with its own actix system so the
//! capture and inference threads never touch the async runtime. Startup
//! blocks until the listener is bound, so a bind failure fails the pipeline.

use std::{net::SocketAddr, thread};

use actix_web::{App, HttpResponse, HttpServer, http::header, web};
use anyhow::{Context, Result, bail};
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::pipeline::{
    data::{DetectionsResponse, PipelineContext},
    encoding::{BOUNDARY, StreamEncoder},
    html::INDEX_HTML,
    telemetry,
};

/// Seconds actix waits for open connections during a graceful stop.
const SHUTDOWN_TIMEOUT_SECS: u64 = 2;
const WORKERS: usize = 2;

#[derive(Clone, Debug)]
pub struct HttpSettings {
    pub host: String,
    pub port: u16,
}

/// Handle for the server thread.
pub struct PreviewServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
    addrs: Vec<SocketAddr>,
}

impl PreviewServer {
    /// First bound address; useful when binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addrs.first().copied()
    }

    /// Stop accepting connections and block until the thread exits.
    pub fn stop(mut self) {
        self.shutdown_now();
    }

    fn shutdown_now(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Preview server thread panicked");
            }
            info!("Preview server stopped");
        }
    }
}

impl Drop for PreviewServer {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

/// Register every route on an actix app.
pub fn routes(ctx: PipelineContext) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::Data::new(ctx))
            .route("/", web::get().to(index_route))
            .route("/video_feed", web::get().to(stream_handler))
            .route("/stream.mjpg", web::get().to(stream_handler))
            .route("/frame.jpg", web::get().to(frame_handler))
            .route("/status", web::get().to(status_handler))
            .route("/detections", web::get().to(detections_handler))
            .route("/metrics", web::get().to(metrics_handler));
    }
}

/// Spawn the server thread and wait for the listener to bind.
pub fn spawn_preview_server(ctx: PipelineContext, http: &HttpSettings) -> Result<PreviewServer> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (ready_tx, ready_rx) =
        crossbeam_channel::bounded::<std::result::Result<Vec<SocketAddr>, String>>(1);
    let bind = (http.host.clone(), http.port);

    let handle = telemetry::spawn_thread("vision-preview-server", move || {
        let result = actix_web::rt::System::new().block_on(async move {
            let server = match HttpServer::new(move || App::new().configure(routes(ctx.clone())))
                .workers(WORKERS)
                .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
                .bind(bind)
            {
                Ok(server) => server,
                Err(err) => {
                    let _ = ready_tx.send(Err(err.to_string()));
                    return Ok(());
                }
            };
            let addrs = server.addrs();
            let server = server.run();
            let srv_handle = server.handle();
            let _ = ready_tx.send(Ok(addrs));

            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        });
        if let Err(err) = result {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn preview server thread")?;

    match ready_rx.recv() {
        Ok(Ok(addrs)) => {
            for addr in &addrs {
                info!("Preview server listening on http://{addr}");
            }
            Ok(PreviewServer {
                shutdown: Some(shutdown_tx),
                handle: Some(handle),
                addrs,
            })
        }
        Ok(Err(message)) => {
            let _ = handle.join();
            bail!("Failed to bind {}:{}: {message}", http.host, http.port)
        }
        Err(_) => {
            let _ = handle.join();
            bail!("Preview server thread exited before binding")
        }
    }
}

/// Serve the viewer page.
async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

/// Stream the annotated feed as multipart JPEG, one encoder per client.
async fn stream_handler(ctx: web::Data<PipelineContext>) -> HttpResponse {
    if !ctx.is_running() {
        return HttpResponse::ServiceUnavailable().finish();
    }
    let encoder = StreamEncoder::new(ctx.hub.clone(), ctx.running.clone());

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Type"))
        .append_header(("Cache-Control", "no-cache, no-store, must-revalidate"))
        .content_type(format!("multipart/x-mixed-replace; boundary={BOUNDARY}"))
        .streaming(encoder.into_stream())
}

/// Return the latest annotated frame as a single JPEG.
async fn frame_handler(ctx: web::Data<PipelineContext>) -> HttpResponse {
    match ctx.hub.encoded() {
        Some(encoded) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .append_header(("X-Sequence", encoded.sequence.to_string()))
            .body(encoded.jpeg),
        None => HttpResponse::NoContent().finish(),
    }
}

async fn status_handler(ctx: web::Data<PipelineContext>) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .json(ctx.status())
}

/// Return the most recent detection snapshot as JSON.
async fn detections_handler(ctx: web::Data<PipelineContext>) -> HttpResponse {
    let snapshot = ctx.state.snapshot();
    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .json(DetectionsResponse {
            sequence: snapshot.sequence,
            timestamp_ms: snapshot.timestamp_ms,
            fps: snapshot.fps,
            detections: &snapshot.detections,
        })
}

/// Prometheus text exposition; empty when no recorder is installed.
async fn metrics_handler() -> HttpResponse {
    let body = telemetry::prometheus_handle()
        .map(|handle| handle.render())
        .unwrap_or_default();
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body)
}
