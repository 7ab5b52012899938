//! Process-local store, used when running without a database and in tests.

use crate::{
    auth::TokenDigest,
    data::{
        StudentFilter, StudentStore, UserStore,
        student::{CPF_TAKEN, Cpf, NewStudent, Student, StudentChanges, StudentStatus},
        user::{AddUserForm, User},
    },
    error::{MatriculaResult, ValidationSnafu},
    validation::ValidationErrors,
};
use async_trait::async_trait;
use email_address::EmailAddress;
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryStore {
    students: Mutex<Vec<Student>>,
    users: Mutex<Vec<User>>,
}

impl MemoryStore {
    fn students(&self) -> MutexGuard<'_, Vec<Student>> {
        self.students.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn users(&self) -> MutexGuard<'_, Vec<User>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn cpf_clash(students: &[Student], cpf: &Cpf, except: Option<Uuid>) -> bool {
    students
        .iter()
        .any(|student| &student.cpf == cpf && Some(student.id) != except)
}

#[async_trait]
impl StudentStore for MemoryStore {
    async fn get_all(&self, filter: &StudentFilter) -> MatriculaResult<Vec<Student>> {
        Ok(self
            .students()
            .iter()
            .filter(|student| filter.matches(student))
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, id: Uuid) -> MatriculaResult<Option<Student>> {
        Ok(self.students().iter().find(|s| s.id == id).cloned())
    }

    async fn cpf_taken(&self, cpf: &Cpf, except: Option<Uuid>) -> MatriculaResult<bool> {
        Ok(cpf_clash(&self.students(), cpf, except))
    }

    async fn insert(&self, to_be_added: NewStudent) -> MatriculaResult<Student> {
        let NewStudent {
            name,
            cpf,
            birth_date,
            class,
            email,
            phone,
            course,
            status,
        } = to_be_added;

        let mut students = self.students();
        if cpf_clash(&students, &cpf, None) {
            return ValidationSnafu {
                errors: ValidationErrors::single("cpf", CPF_TAKEN),
            }
            .fail();
        }

        let now = OffsetDateTime::now_utc();
        let student = Student {
            id: Uuid::new_v4(),
            name,
            cpf,
            birth_date,
            class,
            email,
            phone,
            course,
            status,
            created_at: now,
            updated_at: now,
        };
        students.push(student.clone());

        Ok(student)
    }

    async fn update(&self, id: Uuid, changes: StudentChanges) -> MatriculaResult<Option<Student>> {
        let mut students = self.students();

        if changes
            .cpf
            .as_ref()
            .is_some_and(|cpf| cpf_clash(&students, cpf, Some(id)))
        {
            return ValidationSnafu {
                errors: ValidationErrors::single("cpf", CPF_TAKEN),
            }
            .fail();
        }

        let Some(student) = students.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };
        changes.apply_to(student);
        student.updated_at = OffsetDateTime::now_utc();

        Ok(Some(student.clone()))
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: StudentStatus,
        new: StudentStatus,
    ) -> MatriculaResult<Option<Student>> {
        let mut students = self.students();

        let Some(student) = students
            .iter_mut()
            .find(|s| s.id == id && s.status == expected)
        else {
            return Ok(None);
        };
        student.status = new;
        student.updated_at = OffsetDateTime::now_utc();

        Ok(Some(student.clone()))
    }

    async fn remove(&self, id: Uuid) -> MatriculaResult<bool> {
        let mut students = self.students();
        let before = students.len();
        students.retain(|s| s.id != id);
        Ok(students.len() != before)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_by_email(&self, email: &EmailAddress) -> MatriculaResult<Option<User>> {
        Ok(self
            .users()
            .iter()
            .find(|user| user.email.as_str().eq_ignore_ascii_case(email.as_str()))
            .cloned())
    }

    async fn get_by_access_token(&self, digest: &TokenDigest) -> MatriculaResult<Option<User>> {
        Ok(self
            .users()
            .iter()
            .find(|user| user.access_token.as_ref() == Some(digest))
            .cloned())
    }

    async fn set_access_token(
        &self,
        id: Uuid,
        digest: Option<&TokenDigest>,
    ) -> MatriculaResult<()> {
        if let Some(user) = self.users().iter_mut().find(|user| user.id == id) {
            user.access_token = digest.cloned();
        }
        Ok(())
    }

    async fn insert_user(&self, to_be_added: AddUserForm) -> MatriculaResult<User> {
        let AddUserForm {
            name,
            email,
            bcrypt_hashed_password,
            role,
        } = to_be_added;

        let mut users = self.users();
        if users
            .iter()
            .any(|user| user.email.as_str().eq_ignore_ascii_case(email.as_str()))
        {
            return ValidationSnafu {
                errors: ValidationErrors::single("email", "The email has already been taken."),
            }
            .fail();
        }

        let user = User {
            id: Uuid::new_v4(),
            name,
            email,
            bcrypt_hashed_password,
            role,
            access_token: None,
        };
        users.push(user.clone());

        Ok(user)
    }
}
