#![warn(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::single_match_else, clippy::missing_errors_doc)]

use crate::{
    routes::{
        login::{get_user, post_login, post_logout},
        not_found,
        students::{
            delete_student, get_student, get_students, patch_student_status, post_student,
            put_student,
        },
    },
    state::MatriculaState,
};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, patch, post},
};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

#[macro_use]
extern crate tracing;

pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod notify;
pub mod routes;
pub mod service;
pub mod state;
pub mod validation;

const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn router(state: MatriculaState) -> Router {
    let api = Router::new()
        .route("/login", post(post_login))
        .route("/logout", post(post_logout))
        .route("/user", get(get_user))
        .route("/alunos", get(get_students).post(post_student))
        .route(
            "/alunos/{id}",
            get(get_student).put(put_student).delete(delete_student),
        )
        .route("/alunos/{id}/status", patch(patch_student_status));

    Router::new()
        .nest("/api", api)
        .fallback(not_found)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Lets a separately hosted frontend on `origin` call the API.
pub fn cors_layer(origin: HeaderValue) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
}
