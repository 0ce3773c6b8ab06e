//! Burrow - convention-over-configuration file-tree routing.
//!
//! Burrow turns a directory of route files into a live HTTP route table. The
//! path of each file under the routes directory becomes its URL pattern,
//! `[id]` segments become parameters and `[...rest]` a catch-all. Middleware
//! is attached by convention: `_`-prefixed files in the middleware directory
//! run for every request, `_middleware` files in a routes subdirectory run for
//! its subtree, and routes may name middleware explicitly.
//!
//! # Features
//! - Deterministic route registration (first file wins, duplicates reported)
//! - Global, directory-scoped and named middleware, each bound once per build
//! - Per-route JSON Schema validation of params, query, headers, cookies and body
//! - Error boundary turning handler failures and panics into 500 responses
//! - Hot reload: file changes rebuild the table off to the side and swap it in
//!   atomically, so in-flight requests finish on the generation they started on
//! - Structured request logging via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use burrow::{HttpHandler, ManifestLoader, RebuildCoordinator, RouteBuilder, config::RoutingConfig};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let routing = RoutingConfig::new("./routes", "./middleware");
//! let loader = Arc::new(ManifestLoader::new(&routing.middleware_dir));
//! let coordinator = RebuildCoordinator::start(RouteBuilder::new(routing, loader)).await?;
//!
//! let app = HttpHandler::new(coordinator.handle()).into_router(None);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits for module loading, change watching
//! and schemas) from **adapters** (manifest files, `notify`, JSON Schema,
//! axum) while the route table, builder and rebuild logic live in `core`.
//!
//! # Error Handling
//! Library APIs return domain error types built with `thiserror`; the binary
//! wraps them with `eyre` context.
// Re-export public modules with explicit visibility controls
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{FsChangeWatcher, HttpHandler, JsonSchema, ManifestLoader, RegistryLoader},
    core::{
        BuildReport, Context, Dispatcher, Handler, Next, RebuildCoordinator, RouteBuilder,
        RouteConfig, RouteDefinition,
    },
    utils::GracefulShutdown,
};
