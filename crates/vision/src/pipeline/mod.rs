//! End-to-end vision pipeline: capture at two resolutions, detect on the
//! small stream, overlay on the large one, and serve it over HTTP.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `state`: Detection snapshot shared between threads.
//! - `inference`: Background detector loop.
//! - `capture`: Display loop drawing overlays into the frame hub.
//! - `annotation`: Box, label, and FPS drawing primitives.
//! - `hub` / `encoding`: Latest frame, the JPEG encoder thread, and per-client
//!   MJPEG streams.
//! - `server`: Actix Web endpoints.
//! - `controller`: Ordered startup and shutdown.
//! - `watchdog`: Health monitoring for the pipeline threads.

pub mod annotation;
pub mod capture;
pub mod config;
pub mod controller;
pub mod data;
pub mod encoding;
pub mod filter;
pub mod html;
pub mod hub;
pub mod inference;
pub mod resources;
pub mod runner;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod watchdog;
