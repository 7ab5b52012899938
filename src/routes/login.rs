use crate::{
    auth::{CurrentUser, TokenDigest, UNKNOWN_USER_HASH, generate_access_token, verify_password},
    data::user::User,
    error::{InvalidCredentialsSnafu, MatriculaResult},
    routes::{Data, json_body},
    state::MatriculaState,
    validation::{FieldReader, Presence},
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use snafu::ensure;

#[derive(Serialize)]
pub struct LoginResponse {
    access_token: String,
    token_type: &'static str,
    user: User,
}

pub async fn post_login(
    State(state): State<MatriculaState>,
    body: Result<Json<Value>, JsonRejection>,
) -> MatriculaResult<Json<LoginResponse>> {
    let body = json_body(body)?;

    let mut reader = FieldReader::new(&body);
    let email = reader.email("email", Presence::Required);
    // passwords are taken verbatim, without trimming
    let password = match body.get("password") {
        Some(Value::String(password)) if !password.is_empty() => {
            Some(SecretString::from(password.as_str()))
        }
        Some(Value::String(_) | Value::Null) | None => {
            reader.reject("password", "The password field is required.");
            None
        }
        Some(_) => {
            reader.reject("password", "The password field must be a string.");
            None
        }
    };
    let errors = reader.finish();
    let (Some(email), Some(password)) = (email, password) else {
        return Err(errors.into());
    };

    let Some(user) = state.users().get_by_email(&email).await? else {
        verify_password(password, SecretString::from(UNKNOWN_USER_HASH)).await?;
        return InvalidCredentialsSnafu.fail();
    };
    ensure!(
        verify_password(password, user.bcrypt_hashed_password.clone()).await?,
        InvalidCredentialsSnafu
    );

    let token = generate_access_token();
    state
        .users()
        .set_access_token(user.id, Some(&TokenDigest::of(&token)))
        .await?;
    info!(id = %user.id, role = %user.role, "User logged in");

    Ok(Json(LoginResponse {
        access_token: token.expose_secret().to_string(),
        token_type: "Bearer",
        user,
    }))
}

pub async fn post_logout(
    State(state): State<MatriculaState>,
    CurrentUser(user): CurrentUser,
) -> MatriculaResult<StatusCode> {
    state.users().set_access_token(user.id, None).await?;
    info!(id = %user.id, "User logged out");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_user(CurrentUser(user): CurrentUser) -> Json<Data<User>> {
    Data::json(user)
}
