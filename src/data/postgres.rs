use crate::{
    auth::TokenDigest,
    config::DbConfig,
    data::{
        StudentFilter, StudentStore, UserStore,
        student::{CPF_TAKEN, Cpf, NewStudent, Student, StudentChanges, StudentStatus},
        user::{AddUserForm, Role, User},
    },
    error::{
        EmailSnafu, MakeQuerySnafu, MatriculaError, MatriculaResult, MigrateSnafu,
        OpenDatabaseSnafu,
    },
    validation::ValidationErrors,
};
use async_trait::async_trait;
use email_address::EmailAddress;
use secrecy::{ExposeSecret, SecretString};
use snafu::ResultExt;
use sqlx::{FromRow, Pool, Postgres, QueryBuilder, postgres::PgPoolOptions};
use std::str::FromStr;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

const STUDENT_COLUMNS: &str = "id, nome, cpf, data_nascimento, turma, email, telefone, curso, status, created_at, updated_at";
const USER_COLUMNS: &str = "id, name, email, bcrypt_hashed_password, perfil, access_token_digest";

const CPF_CONSTRAINT: &str = "alunos_cpf_key";
const USER_EMAIL_CONSTRAINT: &str = "users_email_key";

#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    pub async fn connect(options: PgPoolOptions, config: &DbConfig) -> MatriculaResult<Self> {
        let pool = options
            .connect(&config.get_db_path())
            .await
            .context(OpenDatabaseSnafu)?;

        sqlx::migrate!().run(&pool).await.context(MigrateSnafu)?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(FromRow)]
struct StudentRow {
    id: Uuid,
    nome: String,
    cpf: String,
    data_nascimento: Date,
    turma: String,
    email: Option<String>,
    telefone: Option<String>,
    curso: Option<String>,
    status: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<StudentRow> for Student {
    type Error = MatriculaError;

    fn try_from(row: StudentRow) -> Result<Self, Self::Error> {
        let email = match row.email {
            Some(email) => Some(
                EmailAddress::from_str(&email).context(EmailSnafu { original: email })?,
            ),
            None => None,
        };

        Ok(Self {
            id: row.id,
            name: row.nome,
            cpf: Cpf::try_from(row.cpf)?,
            birth_date: row.data_nascimento,
            class: row.turma,
            email,
            phone: row.telefone,
            course: row.curso,
            status: StudentStatus::try_from(row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    bcrypt_hashed_password: String,
    perfil: String,
    access_token_digest: Option<String>,
}

impl TryFrom<UserRow> for User {
    type Error = MatriculaError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let email = EmailAddress::from_str(&row.email).context(EmailSnafu {
            original: row.email.clone(),
        })?;

        Ok(Self {
            id: row.id,
            name: row.name,
            email,
            bcrypt_hashed_password: SecretString::from(row.bcrypt_hashed_password),
            role: Role::try_from(row.perfil)?,
            access_token: row.access_token_digest.map(TokenDigest::from_stored),
        })
    }
}

/// Unique violations on the constraints we know about become validation errors,
/// anything else stays a query error.
fn translate_write_error(source: sqlx::Error) -> MatriculaError {
    let constraint = match &source {
        sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
            db_error.constraint().map(ToString::to_string)
        }
        _ => None,
    };

    match constraint.as_deref() {
        Some(CPF_CONSTRAINT) => ValidationErrors::single("cpf", CPF_TAKEN).into(),
        Some(USER_EMAIL_CONSTRAINT) => {
            ValidationErrors::single("email", "The email has already been taken.").into()
        }
        _ => MatriculaError::MakeQuery { source },
    }
}

/// `%`, `_` and `\` in user input match literally.
fn escape_like(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len());
    for c in fragment.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl StudentStore for PostgresStore {
    async fn get_all(&self, filter: &StudentFilter) -> MatriculaResult<Vec<Student>> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {STUDENT_COLUMNS} FROM public.alunos WHERE TRUE"
        ));
        if let Some(fragment) = filter.name_fragment() {
            query
                .push(" AND nome ILIKE ")
                .push_bind(format!("%{}%", escape_like(fragment)));
        }
        if let Some(cpf) = &filter.cpf {
            query.push(" AND cpf = ").push_bind(cpf.clone());
        }
        query.push(" ORDER BY created_at, id");

        query
            .build_query_as::<StudentRow>()
            .fetch_all(&self.pool)
            .await
            .context(MakeQuerySnafu)?
            .into_iter()
            .map(Student::try_from)
            .collect()
    }

    async fn get_by_id(&self, id: Uuid) -> MatriculaResult<Option<Student>> {
        sqlx::query_as::<_, StudentRow>(&format!(
            "SELECT {STUDENT_COLUMNS} FROM public.alunos WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context(MakeQuerySnafu)?
        .map(Student::try_from)
        .transpose()
    }

    async fn cpf_taken(&self, cpf: &Cpf, except: Option<Uuid>) -> MatriculaResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM public.alunos WHERE cpf = $1 AND ($2::uuid IS NULL OR id <> $2))",
        )
        .bind(cpf.as_str())
        .bind(except)
        .fetch_one(&self.pool)
        .await
        .context(MakeQuerySnafu)
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

        sqlx::query_as::<_, StudentRow>(&format!(
            "INSERT INTO public.alunos (id, nome, cpf, data_nascimento, turma, email, telefone, curso, status) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {STUDENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(cpf.as_str())
        .bind(birth_date)
        .bind(class)
        .bind(email.map(|email| email.to_string()))
        .bind(phone)
        .bind(course)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(translate_write_error)?
        .try_into()
    }

    async fn update(&self, id: Uuid, changes: StudentChanges) -> MatriculaResult<Option<Student>> {
        let StudentChanges {
            name,
            cpf,
            birth_date,
            class,
            email,
            phone,
            course,
        } = changes;

        sqlx::query_as::<_, StudentRow>(&format!(
            "UPDATE public.alunos SET nome = COALESCE($2, nome), cpf = COALESCE($3, cpf), data_nascimento = COALESCE($4, data_nascimento), turma = COALESCE($5, turma), email = COALESCE($6, email), telefone = COALESCE($7, telefone), curso = COALESCE($8, curso), updated_at = now() WHERE id = $1 RETURNING {STUDENT_COLUMNS}"
        ))
        .bind(id)
        .bind(name)
        .bind(cpf.map(|cpf| cpf.to_string()))
        .bind(birth_date)
        .bind(class)
        .bind(email.map(|email| email.to_string()))
        .bind(phone)
        .bind(course)
        .fetch_optional(&self.pool)
        .await
        .map_err(translate_write_error)?
        .map(Student::try_from)
        .transpose()
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: StudentStatus,
        new: StudentStatus,
    ) -> MatriculaResult<Option<Student>> {
        sqlx::query_as::<_, StudentRow>(&format!(
            "UPDATE public.alunos SET status = $3, updated_at = now() WHERE id = $1 AND status = $2 RETURNING {STUDENT_COLUMNS}"
        ))
        .bind(id)
        .bind(expected.as_str())
        .bind(new.as_str())
        .fetch_optional(&self.pool)
        .await
        .context(MakeQuerySnafu)?
        .map(Student::try_from)
        .transpose()
    }

    async fn remove(&self, id: Uuid) -> MatriculaResult<bool> {
        let result = sqlx::query("DELETE FROM public.alunos WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context(MakeQuerySnafu)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn get_by_email(&self, email: &EmailAddress) -> MatriculaResult<Option<User>> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM public.users WHERE lower(email) = lower($1)"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await
        .context(MakeQuerySnafu)?
        .map(User::try_from)
        .transpose()
    }

    async fn get_by_access_token(&self, digest: &TokenDigest) -> MatriculaResult<Option<User>> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM public.users WHERE access_token_digest = $1"
        ))
        .bind(digest.as_str())
        .fetch_optional(&self.pool)
        .await
        .context(MakeQuerySnafu)?
        .map(User::try_from)
        .transpose()
    }

    async fn set_access_token(
        &self,
        id: Uuid,
        digest: Option<&TokenDigest>,
    ) -> MatriculaResult<()> {
        sqlx::query(
            "UPDATE public.users SET access_token_digest = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(digest.map(TokenDigest::as_str))
        .execute(&self.pool)
        .await
        .context(MakeQuerySnafu)?;
        Ok(())
    }

    async fn insert_user(&self, to_be_added: AddUserForm) -> MatriculaResult<User> {
        let AddUserForm {
            name,
            email,
            bcrypt_hashed_password,
            role,
        } = to_be_added;

        sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO public.users (id, name, email, bcrypt_hashed_password, perfil) VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(email.as_str())
        .bind(bcrypt_hashed_password.expose_secret())
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(translate_write_error)?
        .try_into()
    }
}
