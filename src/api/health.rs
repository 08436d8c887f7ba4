use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Root handler: service banner, no authentication.
pub fn root_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let app = &state.config.app;
    Json(json!({
        "message": format!("Welcome to {}", app.name),
        "version": app.version,
        "description": app.description,
    }))
}
