use crate::{
    config::BootstrapAccount,
    data::{
        UserStore,
        user::{AddUserForm, User},
    },
    error::{
        BcryptSnafu, IncorrectPermissionsSnafu, JoinTaskSnafu, MatriculaError, MatriculaResult,
        UnauthenticatedSnafu,
    },
    state::MatriculaState,
};
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use bitflags::bitflags;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use snafu::{OptionExt, ResultExt, ensure};

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct PermissionsTarget: u8 {
        const VIEW_STUDENTS =         0b0000_0001;
        const CREATE_STUDENTS =       0b0000_0010;
        const EDIT_STUDENTS =         0b0000_0100;
        const DELETE_STUDENTS =       0b0000_1000;
        const CHANGE_STUDENT_STATUS = 0b0001_0000;
    }
}

pub trait AuthUtilities {
    fn can(&self, target: PermissionsTarget) -> bool;
    fn ensure_can(&self, target: PermissionsTarget) -> MatriculaResult<()>;
}

impl AuthUtilities for User {
    fn can(&self, target: PermissionsTarget) -> bool {
        self.get_permissions().contains(target)
    }

    fn ensure_can(&self, target: PermissionsTarget) -> MatriculaResult<()> {
        let found = self.get_permissions();
        ensure!(
            found.contains(target),
            IncorrectPermissionsSnafu {
                needed: target,
                found,
            }
        );
        Ok(())
    }
}

/// The user behind the request's bearer token.
pub struct CurrentUser(pub User);

impl FromRequestParts<MatriculaState> for CurrentUser {
    type Rejection = MatriculaError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &MatriculaState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .context(UnauthenticatedSnafu)?;
        let digest = TokenDigest::of(&SecretString::from(token));

        state
            .users()
            .get_by_access_token(&digest)
            .await?
            .map(Self)
            .context(UnauthenticatedSnafu)
    }
}

/// Hex SHA-256 of an access token. Stores only ever see this, never the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDigest(String);

impl TokenDigest {
    pub fn of(token: &SecretString) -> Self {
        let mut hasher: Sha256 = Digest::new();
        hasher.update(token.expose_secret().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wraps a digest read back from storage.
    pub const fn from_stored(digest: String) -> Self {
        Self(digest)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Verified against on logins with an unknown email, so those cost as much
/// as a wrong password. Same cost as `bcrypt::DEFAULT_COST`.
pub const UNKNOWN_USER_HASH: &str = "$2b$12$A/z2V1HJ7/pqq6iqHrHAR.p.uXKG6V6572OEDR5aNpHms7Ub7Hkpu";

pub fn generate_access_token() -> SecretString {
    let bytes: [u8; 32] = rand::random();
    SecretString::from(URL_SAFE_NO_PAD.encode(bytes))
}

pub async fn hash_password(password: SecretString, cost: u32) -> MatriculaResult<SecretString> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password.expose_secret(), cost))
        .await
        .context(JoinTaskSnafu)?
        .context(BcryptSnafu)
        .map(SecretString::from)
}

pub async fn verify_password(password: SecretString, hash: SecretString) -> MatriculaResult<bool> {
    tokio::task::spawn_blocking(move || {
        bcrypt::verify(password.expose_secret(), hash.expose_secret())
    })
    .await
    .context(JoinTaskSnafu)?
    .context(BcryptSnafu)
}

/// Creates each configured account whose email isn't registered yet.
pub async fn ensure_bootstrap_accounts(
    users: &dyn UserStore,
    accounts: &[BootstrapAccount],
    cost: u32,
) -> MatriculaResult<()> {
    for account in accounts {
        if users.get_by_email(&account.email).await?.is_some() {
            debug!(email = %account.email, "Bootstrap account already exists");
            continue;
        }

        let bcrypt_hashed_password = hash_password(account.password.clone(), cost).await?;
        let user = users
            .insert_user(AddUserForm {
                name: account.name.clone(),
                email: account.email.clone(),
                bcrypt_hashed_password,
                role: account.role,
            })
            .await?;
        info!(id = %user.id, email = %user.email, role = %user.role, "Created bootstrap account");
    }

    Ok(())
}
