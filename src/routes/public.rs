use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::services::ServeDir;

/// Public Router Module
///
/// Endpoints the permission table marks as public. No principal is ever attached to
/// these requests.
pub fn public_routes(static_dir: &str) -> Router<AppState> {
    Router::new()
        // GET /login
        // The login form. `?error` and `?logout` toggle the page's banners.
        // POST /login
        // Form login (`username`, `password`, optional `remember-me`).
        .route(
            "/login",
            get(handlers::carregar_pagina_login).post(handlers::efetuar_login),
        )
        // POST /logout
        // Clears the session and remember-me cookies.
        .route("/logout", post(handlers::efetuar_logout))
        // Static assets served straight from disk.
        .nest_service("/css", ServeDir::new(format!("{static_dir}/css")))
        .nest_service("/js", ServeDir::new(format!("{static_dir}/js")))
        .nest_service("/assets", ServeDir::new(format!("{static_dir}/assets")))
}
