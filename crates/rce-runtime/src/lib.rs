//! `rce-runtime` – Hosting pieces for the interface bridge.
//!
//! # Modules
//!
//! - [`pool`] – [`WorkerPool`]: a Tokio-backed [`Manager`][rce_bridge::Manager]
//!   that keeps the interface registry and runs blocking service calls on the
//!   blocking thread pool, at most `max_in_flight_calls` at a time.
//! - [`settings`] – [`BridgeSettings`]: TOML settings with `RCE_*`
//!   environment overrides.
//! - [`telemetry`] – [`init_tracing`]: `tracing` subscriber with optional
//!   OTLP span export.

pub mod pool;
pub mod settings;
pub mod telemetry;

pub use pool::WorkerPool;
pub use settings::{BridgeSettings, SettingsError};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
