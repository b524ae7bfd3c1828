mod common;

use std::{
    pin::pin,
    sync::atomic::Ordering,
    time::{Duration, Instant},
};

use actix_web::{
    App,
    body::MessageBody,
    http::{StatusCode, header},
    test,
    web::Bytes,
};
use common::detection;
use futures_util::future::poll_fn;
use ml_core::BoundingBox;
use video_ingest::Frame;
use vision::{
    PipelineContext,
    pipeline::{
        encoding::{encode_step, spawn_encode_worker},
        server::routes,
        telemetry,
    },
};

async fn first_chunk<B: MessageBody>(body: B) -> Option<Bytes> {
    let mut body = pin!(body);
    poll_fn(|cx| body.as_mut().poll_next(cx))
        .await
        .and_then(Result::ok)
}

fn get(uri: &str) -> test::TestRequest {
    test::TestRequest::get().uri(uri)
}

/// Publish and encode on the calling thread so the request sees the frame.
fn publish_encoded(ctx: &PipelineContext, frame: Frame) {
    ctx.hub.publish(frame);
    encode_step(&ctx.hub, ctx.jpeg_quality, Duration::ZERO).unwrap();
}

#[actix_web::test]
async fn status_reports_running_state_and_detector() {
    let ctx = PipelineContext::new("mock-detector", 85);
    let app = test::init_service(App::new().configure(routes(ctx.clone()))).await;

    let body: serde_json::Value =
        test::call_and_read_body_json(&app, get("/status").to_request()).await;
    assert_eq!(body["status"], "running");
    assert_eq!(body["running"], true);
    assert_eq!(body["detector"], "mock-detector");
    assert!(body["fps"].is_number());
    assert!(body["timestamp"].is_string());
    assert!(body["stalled"].is_null());

    ctx.running.store(false, Ordering::SeqCst);
    let body: serde_json::Value =
        test::call_and_read_body_json(&app, get("/status").to_request()).await;
    assert_eq!(body["status"], "stopped");
    assert_eq!(body["running"], false);
}

#[actix_web::test]
async fn frame_endpoint_is_empty_until_first_encoded_frame() {
    let ctx = PipelineContext::new("mock-detector", 85);
    let app = test::init_service(App::new().configure(routes(ctx.clone()))).await;

    let resp = test::call_service(&app, get("/frame.jpg").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    ctx.hub.publish(Frame::filled(32, 24, [20, 40, 60]));
    let resp = test::call_service(&app, get("/frame.jpg").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    encode_step(&ctx.hub, ctx.jpeg_quality, Duration::ZERO).unwrap();
    let resp = test::call_service(&app, get("/frame.jpg").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "image/jpeg");
    assert_eq!(resp.headers().get("X-Sequence").unwrap(), "1");
    let body = test::read_body(resp).await;
    assert_eq!(&body[..2], &[0xFF, 0xD8]);
}

#[actix_web::test]
async fn video_feed_streams_multipart_jpeg_per_client() {
    let ctx = PipelineContext::new("mock-detector", 85);
    publish_encoded(&ctx, Frame::filled(32, 24, [200, 0, 0]));
    let app = test::init_service(App::new().configure(routes(ctx.clone()))).await;

    let first = test::call_service(&app, get("/video_feed").to_request()).await;
    let second = test::call_service(&app, get("/stream.mjpg").to_request()).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(
        first.headers().get(header::CONTENT_TYPE).unwrap(),
        "multipart/x-mixed-replace; boundary=frame"
    );
    assert_eq!(ctx.hub.viewers(), 2);

    let chunk = first_chunk(first.into_body()).await.unwrap();
    assert!(chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));
    assert!(chunk.ends_with(b"\r\n"));

    let chunk = first_chunk(second.into_body()).await.unwrap();
    assert!(chunk.starts_with(b"--frame\r\n"));
    assert_eq!(ctx.hub.viewers(), 0);
}

#[actix_web::test]
async fn video_feed_ends_when_pipeline_stops() {
    let ctx = PipelineContext::new("mock-detector", 85);
    let app = test::init_service(App::new().configure(routes(ctx.clone()))).await;

    let resp = test::call_service(&app, get("/video_feed").to_request()).await;
    ctx.running.store(false, Ordering::SeqCst);
    assert!(first_chunk(resp.into_body()).await.is_none());

    let resp = test::call_service(&app, get("/video_feed").to_request()).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[actix_web::test]
async fn large_frame_encode_does_not_stall_other_requests() {
    let ctx = PipelineContext::new("mock-detector", 85);
    let app = test::init_service(App::new().configure(routes(ctx.clone()))).await;
    let encoder =
        spawn_encode_worker(ctx.hub.clone(), ctx.running.clone(), ctx.jpeg_quality).unwrap();

    let feed = test::call_service(&app, get("/video_feed").to_request()).await;
    let pending = actix_web::rt::spawn(first_chunk(feed.into_body()));
    ctx.hub.publish(Frame::filled(3840, 2160, [90, 120, 150]));
    actix_web::rt::time::sleep(Duration::from_millis(1)).await;

    let started = Instant::now();
    let resp = test::call_service(&app, get("/status").to_request()).await;
    let elapsed = started.elapsed();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(elapsed < Duration::from_millis(100), "/status took {elapsed:?}");

    let chunk = pending.await.unwrap().unwrap();
    assert!(chunk.starts_with(b"--frame\r\n"));

    ctx.running.store(false, Ordering::SeqCst);
    encoder.join().unwrap();
}

#[actix_web::test]
async fn detections_endpoint_returns_latest_snapshot() {
    let ctx = PipelineContext::new("mock-detector", 85);
    ctx.state.publish(vec![detection(4, 0.66, BoundingBox::new(1, 2, 3, 4))]);
    let app = test::init_service(App::new().configure(routes(ctx))).await;

    let body: serde_json::Value =
        test::call_and_read_body_json(&app, get("/detections").to_request()).await;
    assert_eq!(body["sequence"], 1);
    assert_eq!(body["detections"][0]["class_name"], "book");
    assert_eq!(body["detections"][0]["bbox"]["x1"], 3);
}

#[actix_web::test]
async fn index_and_metrics_are_served() {
    telemetry::init_metrics_recorder();
    let ctx = PipelineContext::new("mock-detector", 85);
    let app = test::init_service(App::new().configure(routes(ctx))).await;

    let resp = test::call_service(&app, get("/").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = test::read_body(resp).await;
    assert!(String::from_utf8_lossy(&body).contains("/video_feed"));

    let resp = test::call_service(&app, get("/metrics").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
}
