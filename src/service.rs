use crate::{
    auth::{AuthUtilities, PermissionsTarget},
    data::{
        StudentFilter, StudentStore,
        student::{CPF_TAKEN, Student, StatusTarget, StudentFields},
        user::User,
    },
    error::{MatriculaResult, MissingStudentSnafu, StatusConflictSnafu},
    notify::{Notifier, StatusChange},
    validation::Presence,
};
use serde_json::Value;
use snafu::OptionExt;
use std::sync::Arc;
use uuid::Uuid;

/// How often a status change is re-evaluated after losing a race with another writer.
const STATUS_CHANGE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct StudentService {
    store: Arc<dyn StudentStore>,
    notifier: Notifier,
}

impl StudentService {
    pub fn new(store: Arc<dyn StudentStore>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    pub async fn list(&self, actor: &User, filter: &StudentFilter) -> MatriculaResult<Vec<Student>> {
        actor.ensure_can(PermissionsTarget::VIEW_STUDENTS)?;
        self.store.get_all(filter).await
    }

    pub async fn get(&self, actor: &User, id: Uuid) -> MatriculaResult<Student> {
        actor.ensure_can(PermissionsTarget::VIEW_STUDENTS)?;
        self.find(id).await
    }

    pub async fn create(&self, actor: &User, body: &Value) -> MatriculaResult<Student> {
        actor.ensure_can(PermissionsTarget::CREATE_STUDENTS)?;

        let (fields, mut errors) = StudentFields::read(body, Presence::Required);
        if let Some(cpf) = &fields.cpf {
            if self.store.cpf_taken(cpf, None).await? {
                errors.add("cpf", CPF_TAKEN);
            }
        }
        errors.into_result()?;

        let student = self.store.insert(fields.into_new_student()?).await?;
        info!(id = %student.id, actor = %actor.id, "Registered student");

        Ok(student)
    }

    pub async fn update(&self, actor: &User, id: Uuid, body: &Value) -> MatriculaResult<Student> {
        actor.ensure_can(PermissionsTarget::EDIT_STUDENTS)?;
        let current = self.find(id).await?;

        let (fields, mut errors) = StudentFields::read(body, Presence::Sometimes);
        if let Some(cpf) = &fields.cpf {
            if self.store.cpf_taken(cpf, Some(id)).await? {
                errors.add("cpf", CPF_TAKEN);
            }
        }

        let (changes, requested_status) = fields.into_changes();
        if requested_status.is_some_and(|status| status != current.status) {
            errors.add(
                "status",
                format!("The status field can only be changed through /api/alunos/{id}/status."),
            );
        }
        errors.into_result()?;

        self.store
            .update(id, changes)
            .await?
            .context(MissingStudentSnafu { id })
    }

    pub async fn delete(&self, actor: &User, id: Uuid) -> MatriculaResult<()> {
        actor.ensure_can(PermissionsTarget::DELETE_STUDENTS)?;

        if !self.store.remove(id).await? {
            return MissingStudentSnafu { id }.fail();
        }
        info!(%id, actor = %actor.id, "Removed student");

        Ok(())
    }

    /// Moves a student to `Aprovado` or `Cancelado`, refusing to cancel an approved one.
    /// The change is written with a compare-and-set, so a concurrent writer can't
    /// sneak a forbidden transition past the check.
    pub async fn update_status(
        &self,
        actor: &User,
        id: Uuid,
        body: &Value,
    ) -> MatriculaResult<Student> {
        actor.ensure_can(PermissionsTarget::CHANGE_STUDENT_STATUS)?;
        let mut current = self.find(id).await?;
        let target = StatusTarget::read(body)?;

        for _ in 0..STATUS_CHANGE_ATTEMPTS {
            let from = current.status;
            let to = from.transition(target)?;

            if let Some(updated) = self.store.compare_and_set_status(id, from, to).await? {
                self.notifier.emit(StatusChange {
                    student_id: updated.id,
                    nome: updated.name.clone(),
                    from,
                    to,
                });
                return Ok(updated);
            }

            current = self.find(id).await?;
        }

        StatusConflictSnafu { id }.fail()
    }

    async fn find(&self, id: Uuid) -> MatriculaResult<Student> {
        self.store
            .get_by_id(id)
            .await?
            .context(MissingStudentSnafu { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{
            memory::MemoryStore,
            student::{Cpf, NewStudent, StudentChanges, StudentStatus},
            user::Role,
        },
        error::MatriculaError,
        notify::{LogSink, NotificationSink},
    };
    use async_trait::async_trait;
    use secrecy::SecretString;
    use serde_json::json;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

    struct ForwardingSink(UnboundedSender<StatusChange>);

    #[async_trait]
    impl NotificationSink for ForwardingSink {
        async fn deliver(&self, change: &StatusChange) -> MatriculaResult<()> {
            let _ = self.0.send(change.clone());
            Ok(())
        }
    }

    /// Loses the first `losses` status writes. If `rival` is set, another writer
    /// moves the student to it during each lost write.
    struct RacingStore {
        inner: MemoryStore,
        losses: AtomicUsize,
        rival: Option<StudentStatus>,
    }

    #[async_trait]
    impl StudentStore for RacingStore {
        async fn get_all(&self, filter: &StudentFilter) -> MatriculaResult<Vec<Student>> {
            self.inner.get_all(filter).await
        }

        async fn get_by_id(&self, id: Uuid) -> MatriculaResult<Option<Student>> {
            self.inner.get_by_id(id).await
        }

        async fn cpf_taken(&self, cpf: &Cpf, except: Option<Uuid>) -> MatriculaResult<bool> {
            self.inner.cpf_taken(cpf, except).await
        }

        async fn insert(&self, to_be_added: NewStudent) -> MatriculaResult<Student> {
            self.inner.insert(to_be_added).await
        }

        async fn update(
            &self,
            id: Uuid,
            changes: StudentChanges,
        ) -> MatriculaResult<Option<Student>> {
            self.inner.update(id, changes).await
        }

        async fn compare_and_set_status(
            &self,
            id: Uuid,
            expected: StudentStatus,
            new: StudentStatus,
        ) -> MatriculaResult<Option<Student>> {
            let lost = self
                .losses
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !lost {
                return self.inner.compare_and_set_status(id, expected, new).await;
            }

            if let Some(rival) = self.rival {
                self.inner.compare_and_set_status(id, expected, rival).await?;
            }
            Ok(None)
        }

        async fn remove(&self, id: Uuid) -> MatriculaResult<bool> {
            self.inner.remove(id).await
        }
    }

    fn racing_service(losses: usize, rival: Option<StudentStatus>) -> StudentService {
        StudentService::new(
            Arc::new(RacingStore {
                inner: MemoryStore::default(),
                losses: AtomicUsize::new(losses),
                rival,
            }),
            Notifier::spawn(LogSink),
        )
    }

    fn actor(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            name: role.to_string(),
            email: "actor@test.com".parse().unwrap(),
            bcrypt_hashed_password: SecretString::from(""),
            role,
            access_token: None,
        }
    }

    fn service() -> (StudentService, UnboundedReceiver<StatusChange>) {
        let (tx, rx) = unbounded_channel();
        let service = StudentService::new(
            Arc::new(MemoryStore::default()),
            Notifier::spawn(ForwardingSink(tx)),
        );
        (service, rx)
    }

    fn body(cpf: &str, status: &str) -> Value {
        json!({
            "nome": "João Silva",
            "cpf": cpf,
            "data_nascimento": "1995-05-15",
            "turma": "Turma A",
            "status": status,
        })
    }

    #[tokio::test]
    async fn duplicate_cpf_is_reported_alongside_other_errors() {
        let (service, _rx) = service();
        let gestor = actor(Role::Gestor);
        service.create(&gestor, &body("12345678901", "Pendente")).await.unwrap();

        let err = service
            .create(
                &gestor,
                &json!({"cpf": "12345678901", "nome": "Outro Nome"}),
            )
            .await
            .unwrap_err();
        let MatriculaError::Validation { errors } = err else {
            panic!("expected a validation error, got {err:?}");
        };
        assert!(errors.contains("cpf"));
        assert!(errors.contains("turma"));
    }

    #[tokio::test]
    async fn approval_is_notified_and_cancellation_refused() {
        let (service, mut rx) = service();
        let gestor = actor(Role::Gestor);
        let student = service.create(&gestor, &body("55566677788", "Pendente")).await.unwrap();

        let approved = service
            .update_status(&gestor, student.id, &json!({"status": "Aprovado"}))
            .await
            .unwrap();
        assert_eq!(approved.status, StudentStatus::Approved);

        let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.student_id, student.id);
        assert_eq!(change.from, StudentStatus::Pending);
        assert_eq!(change.to, StudentStatus::Approved);

        let err = service
            .update_status(&gestor, student.id, &json!({"status": "Cancelado"}))
            .await
            .unwrap_err();
        assert!(matches!(err, MatriculaError::ForbiddenTransition { .. }));
        assert_eq!(
            service.get(&gestor, student.id).await.unwrap().status,
            StudentStatus::Approved
        );
    }

    #[tokio::test]
    async fn funcionario_is_stopped_before_anything_else() {
        let (service, _rx) = service();
        let funcionario = actor(Role::Funcionario);

        let err = service
            .update_status(&funcionario, Uuid::nil(), &json!({"status": "Pendente"}))
            .await
            .unwrap_err();
        assert!(matches!(err, MatriculaError::IncorrectPermissions { .. }));

        let err = service.delete(&funcionario, Uuid::nil()).await.unwrap_err();
        assert!(matches!(err, MatriculaError::IncorrectPermissions { .. }));
    }

    #[tokio::test]
    async fn plain_updates_cannot_change_status() {
        let (service, _rx) = service();
        let funcionario = actor(Role::Funcionario);
        let student = service
            .create(&funcionario, &body("12345678901", "Aprovado"))
            .await
            .unwrap();

        let err = service
            .update(&funcionario, student.id, &json!({"status": "Cancelado"}))
            .await
            .unwrap_err();
        let MatriculaError::Validation { errors } = err else {
            panic!("expected a validation error, got {err:?}");
        };
        assert!(errors.contains("status"));

        let same = service
            .update(
                &funcionario,
                student.id,
                &json!({"status": "Aprovado", "turma": "Turma B"}),
            )
            .await
            .unwrap();
        assert_eq!(same.class, "Turma B");
        assert_eq!(same.status, StudentStatus::Approved);
    }

    #[tokio::test]
    async fn missing_students_are_not_found() {
        let (service, _rx) = service();
        let gestor = actor(Role::Gestor);
        let id = Uuid::new_v4();

        assert!(matches!(
            service.get(&gestor, id).await.unwrap_err(),
            MatriculaError::MissingStudent { .. }
        ));
        assert!(matches!(
            service.update(&gestor, id, &json!({})).await.unwrap_err(),
            MatriculaError::MissingStudent { .. }
        ));
        assert!(matches!(
            service.delete(&gestor, id).await.unwrap_err(),
            MatriculaError::MissingStudent { .. }
        ));
        assert!(matches!(
            service
                .update_status(&gestor, id, &json!({"status": "Aprovado"}))
                .await
                .unwrap_err(),
            MatriculaError::MissingStudent { .. }
        ));
    }

    #[tokio::test]
    async fn endlessly_lost_races_end_in_a_conflict() {
        let service = racing_service(usize::MAX, None);
        let gestor = actor(Role::Gestor);
        let student = service.create(&gestor, &body("55566677788", "Pendente")).await.unwrap();

        let err = service
            .update_status(&gestor, student.id, &json!({"status": "Aprovado"}))
            .await
            .unwrap_err();
        assert!(matches!(err, MatriculaError::StatusConflict { id } if id == student.id));
        assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
        assert_eq!(
            service.get(&gestor, student.id).await.unwrap().status,
            StudentStatus::Pending
        );
    }

    #[tokio::test]
    async fn a_lost_race_is_retried() {
        let service = racing_service(STATUS_CHANGE_ATTEMPTS - 1, None);
        let gestor = actor(Role::Gestor);
        let student = service.create(&gestor, &body("55566677788", "Pendente")).await.unwrap();

        let approved = service
            .update_status(&gestor, student.id, &json!({"status": "Aprovado"}))
            .await
            .unwrap();
        assert_eq!(approved.status, StudentStatus::Approved);
    }

    #[tokio::test]
    async fn cancelling_after_a_concurrent_approval_is_refused() {
        let service = racing_service(1, Some(StudentStatus::Approved));
        let gestor = actor(Role::Gestor);
        let student = service.create(&gestor, &body("55566677788", "Pendente")).await.unwrap();

        let err = service
            .update_status(&gestor, student.id, &json!({"status": "Cancelado"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MatriculaError::ForbiddenTransition {
                from: StudentStatus::Approved,
                to: StudentStatus::Cancelled,
            }
        ));
        assert_eq!(
            service.get(&gestor, student.id).await.unwrap().status,
            StudentStatus::Approved
        );
    }
}
