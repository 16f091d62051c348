//! ripple-api — HTTP routes backed by lazy pipelines.
//!
//! Every route builds a [`ripple_core::Single`] or [`ripple_core::Stream`]
//! and renders it through [`body`], which picks the wire format from the
//! `Accept` header.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/mono` | Plain value |
//! | GET | `/mono-empty` | Empty value, empty 200 |
//! | GET | `/mono-switch` | Fallback on empty |
//! | GET | `/mono-supplier` | Deferred supplier |
//! | GET | `/mono-flatmap` | Conditional chaining |
//! | GET | `/mono-filter` | Predicate filter |
//! | GET | `/mono-zip` | Three values joined |
//! | GET | `/v1` | Two-word stream |
//! | GET | `/v2` | Unbounded counter stream |
//! | POST | `/v3` | Uppercase echo |
//! | GET, POST | `/v5`–`/v8` | Functional routes, see [`functional`] |
//! | GET | `/basket` | Fruit basket report |
//! | GET | `/healthz` | Liveness |

pub mod basket;
pub mod body;
pub mod functional;
pub mod handlers;
pub mod model;

use axum::Router;
use axum::routing::{get, post};
use ripple_core::ApiConfig;

/// Shared state for route handlers.
#[derive(Clone)]
pub struct ApiState {
    pub config: ApiConfig,
}

/// Build the complete router.
pub fn build_router(config: ApiConfig) -> Router {
    let state = ApiState { config };

    Router::new()
        .route("/mono", get(handlers::mono))
        .route("/mono-empty", get(handlers::mono_empty))
        .route("/mono-switch", get(handlers::mono_switch))
        .route("/mono-supplier", get(handlers::mono_supplier))
        .route("/mono-flatmap", get(handlers::mono_flatmap))
        .route("/mono-filter", get(handlers::mono_filter))
        .route("/mono-zip", get(handlers::mono_zip))
        .route("/v1", get(handlers::hello))
        .route("/v2", get(handlers::hello_stream))
        .route("/v3", post(handlers::echo))
        .route("/basket", get(basket::basket))
        .route("/healthz", get(handlers::healthz))
        .merge(functional::routes())
        .with_state(state)
}
