//! Defines routes for the derivative service.
//!
//! ## Structure
//! - **Pipeline**
//!   - `POST   /invoke`: run the derivative pipeline for one trigger payload
//!
//! - **Object-level endpoints** (local store)
//!   - `PUT    /{bucket}/{*key}`: upload object
//!   - `GET    /{bucket}/{*key}`: download object
//!   - `HEAD   /{bucket}/{*key}`: retrieve metadata only
//!
//! The wildcard `*key` allows nested keys like `dev/incoming/<id>/original.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        invoke_handlers::invoke,
        object_handlers::{get_object, head_object, upload_object},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build the router. Handlers share `AppState` through the router state.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/invoke", post(invoke))
        .route(
            "/{bucket}/{*key}",
            put(upload_object).get(get_object).head(head_object),
        )
}
