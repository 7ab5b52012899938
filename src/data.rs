use crate::{
    auth::TokenDigest,
    data::{
        student::{Cpf, NewStudent, Student, StudentChanges, StudentStatus},
        user::{AddUserForm, User},
    },
    error::MatriculaResult,
};
use async_trait::async_trait;
use email_address::EmailAddress;
use serde::Deserialize;
use uuid::Uuid;

pub mod memory;
pub mod postgres;
pub mod student;
pub mod user;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentFilter {
    /// Case-insensitive substring of the name.
    pub nome: Option<String>,
    /// Exact CPF.
    pub cpf: Option<String>,
}

impl StudentFilter {
    pub fn name_fragment(&self) -> Option<&str> {
        self.nome.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn matches(&self, student: &Student) -> bool {
        let name_matches = self.name_fragment().is_none_or(|fragment| {
            student
                .name
                .to_lowercase()
                .contains(&fragment.to_lowercase())
        });
        let cpf_matches = self
            .cpf
            .as_deref()
            .is_none_or(|cpf| student.cpf.as_str() == cpf);

        name_matches && cpf_matches
    }
}

/// Durable storage for students. Implementations enforce CPF uniqueness
/// themselves and report a clash as a `cpf` validation error.
#[async_trait]
pub trait StudentStore: Send + Sync {
    async fn get_all(&self, filter: &StudentFilter) -> MatriculaResult<Vec<Student>>;
    async fn get_by_id(&self, id: Uuid) -> MatriculaResult<Option<Student>>;
    /// Whether another student (ignoring `except`) already has this CPF.
    async fn cpf_taken(&self, cpf: &Cpf, except: Option<Uuid>) -> MatriculaResult<bool>;
    async fn insert(&self, to_be_added: NewStudent) -> MatriculaResult<Student>;
    async fn update(&self, id: Uuid, changes: StudentChanges) -> MatriculaResult<Option<Student>>;
    /// Sets the status only if it is still `expected`. Returns `None` if the student
    /// is gone or its status moved on in the meantime.
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: StudentStatus,
        new: StudentStatus,
    ) -> MatriculaResult<Option<Student>>;
    /// Returns whether anything was removed.
    async fn remove(&self, id: Uuid) -> MatriculaResult<bool>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_email(&self, email: &EmailAddress) -> MatriculaResult<Option<User>>;
    async fn get_by_access_token(&self, digest: &TokenDigest) -> MatriculaResult<Option<User>>;
    /// Replaces the user's token, or revokes it with `None`.
    async fn set_access_token(
        &self,
        id: Uuid,
        digest: Option<&TokenDigest>,
    ) -> MatriculaResult<()>;
    async fn insert_user(&self, to_be_added: AddUserForm) -> MatriculaResult<User>;
}
