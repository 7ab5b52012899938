use crate::error::{MalformedBodySnafu, MatriculaResult};
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::{Value, json};
use snafu::ResultExt;

pub mod login;
pub mod students;

/// Envelope every record or list of records is sent in.
#[derive(Debug, Serialize)]
pub struct Data<T> {
    pub data: T,
}

impl<T: Serialize> Data<T> {
    pub const fn json(data: T) -> Json<Self> {
        Json(Self { data })
    }
}

/// Bodies are taken as loose JSON and validated field by field, so a wrong type
/// becomes a 422 on that field rather than a blanket rejection.
pub fn json_body(body: Result<Json<Value>, JsonRejection>) -> MatriculaResult<Value> {
    body.map(|Json(value)| value).context(MalformedBodySnafu)
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"message": "Not Found"})))
}
