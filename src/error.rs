use crate::{
    auth::PermissionsTarget,
    data::student::StudentStatus,
    validation::ValidationErrors,
};
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use snafu::Snafu;
use std::num::ParseIntError;
use uuid::Uuid;

pub type MatriculaResult<T> = Result<T, MatriculaError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MatriculaError {
    #[snafu(display("Error opening database"))]
    OpenDatabase { source: sqlx::Error },
    #[snafu(display("Error making SQL query"))]
    MakeQuery { source: sqlx::Error },
    #[snafu(display("Error migrating DB schema"))]
    Migrate { source: sqlx::migrate::MigrateError },
    #[snafu(display("Unable to retrieve env var `{}`", name))]
    BadEnvVar {
        source: dotenvy::Error,
        name: &'static str,
    },
    #[snafu(display("Unable to parse env var `{}` as a number", name))]
    ParseEnvNumber {
        source: ParseIntError,
        name: &'static str,
    },
    #[snafu(display("Unknown store backend {:?}, expected `postgres` or `memory`", found))]
    UnknownStoreBackend { found: String },
    #[snafu(display("Error parsing email address {:?}", original))]
    Email {
        source: email_address::Error,
        original: String,
    },
    #[snafu(display("Error with hashing/password verification"))]
    Bcrypt { source: bcrypt::BcryptError },
    #[snafu(display("Error joining blocking task"))]
    JoinTask { source: tokio::task::JoinError },
    #[snafu(display("Stored {} has unexpected value {:?}", column, value))]
    CorruptColumn { column: &'static str, value: String },
    #[snafu(display("Unable to deliver notification: {}", message))]
    NotificationDelivery { message: String },
    #[snafu(display("Unauthenticated."))]
    Unauthenticated,
    #[snafu(display("These credentials do not match our records."))]
    InvalidCredentials,
    #[snafu(display("Tried to {:?}, only had {:?}", needed.iter_names().map(|(name, _)| name).collect::<Vec<_>>(), found.iter_names().map(|(name, _)| name).collect::<Vec<_>>()))]
    IncorrectPermissions {
        needed: PermissionsTarget,
        found: PermissionsTarget,
    },
    #[snafu(display("Unable to find student with UUID: {}", id))]
    MissingStudent { id: Uuid },
    #[snafu(display("Unable to find student with id {:?}", original))]
    MalformedStudentId {
        source: uuid::Error,
        original: String,
    },
    #[snafu(display("{}", errors.summary()))]
    Validation { errors: ValidationErrors },
    #[snafu(display("Cannot cancel an already-approved student."))]
    ForbiddenTransition {
        from: StudentStatus,
        to: StudentStatus,
    },
    #[snafu(display("Status of student {} kept changing underneath the update", id))]
    StatusConflict { id: Uuid },
    #[snafu(display("Malformed JSON body: {}", source.body_text()))]
    MalformedBody { source: JsonRejection },
}

impl From<ValidationErrors> for MatriculaError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation { errors }
    }
}

impl MatriculaError {
    #[allow(clippy::match_same_arms)]
    pub fn status_code(&self) -> StatusCode {
        const ISE: StatusCode = StatusCode::INTERNAL_SERVER_ERROR; //internal server error
        const NF: StatusCode = StatusCode::NOT_FOUND; //not found
        const NA: StatusCode = StatusCode::FORBIDDEN; //not allowed
        const UA: StatusCode = StatusCode::UNAUTHORIZED; //unauthenticated
        const BI: StatusCode = StatusCode::UNPROCESSABLE_ENTITY; //bad input

        match self {
            Self::OpenDatabase { .. } => ISE,
            Self::MakeQuery { source } => match source {
                sqlx::Error::RowNotFound => NF,
                _ => ISE,
            },
            Self::Migrate { .. } => ISE,
            Self::BadEnvVar { .. } | Self::ParseEnvNumber { .. } => ISE,
            Self::UnknownStoreBackend { .. } => ISE,
            Self::Email { .. } => ISE,
            Self::Bcrypt { .. } | Self::JoinTask { .. } => ISE,
            Self::CorruptColumn { .. } => ISE,
            Self::NotificationDelivery { .. } => ISE,
            Self::Unauthenticated | Self::InvalidCredentials => UA,
            Self::IncorrectPermissions { .. } => NA,
            Self::MissingStudent { .. } | Self::MalformedStudentId { .. } => NF,
            Self::Validation { .. } | Self::ForbiddenTransition { .. } => BI,
            Self::StatusConflict { .. } => StatusCode::CONFLICT,
            Self::MalformedBody { source } => source.status(),
        }
    }
}

impl IntoResponse for MatriculaError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();

        let body = match &self {
            Self::Validation { errors } => json!({
                "message": errors.summary(),
                "errors": errors,
            }),
            Self::IncorrectPermissions { .. } => json!({
                "message": "This action is unauthorized.",
            }),
            _ if status_code.is_server_error() => json!({
                "message": "Server Error",
            }),
            _ => json!({
                "message": self.to_string(),
            }),
        };

        if status_code.is_server_error() {
            error!(?self, "Error!");
        } else {
            debug!(?self, %status_code, "Rejected request");
        }

        (status_code, Json(body)).into_response()
    }
}
