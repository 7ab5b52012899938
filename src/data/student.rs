use crate::{
    error::{CorruptColumnSnafu, ForbiddenTransitionSnafu, MatriculaError, MatriculaResult},
    validation::{DATE_FORMAT, FieldReader, Presence, ValidationErrors},
};
use email_address::EmailAddress;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use snafu::ensure;
use std::fmt::{self, Display};
use time::{
    Date, OffsetDateTime, UtcOffset, format_description::BorrowedFormatItem,
    macros::format_description,
};
use uuid::Uuid;

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

pub const CPF_TAKEN: &str = "The cpf has already been taken.";
pub const STATUS_INVALID: &str = "The selected status is invalid.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StudentStatus {
    #[serde(rename = "Pendente")]
    Pending,
    #[serde(rename = "Aprovado")]
    Approved,
    #[serde(rename = "Cancelado")]
    Cancelled,
}

/// The statuses a student can be moved to through the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTarget {
    Approved,
    Cancelled,
}

impl StudentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pendente",
            Self::Approved => "Aprovado",
            Self::Cancelled => "Cancelado",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pendente" => Some(Self::Pending),
            "Aprovado" => Some(Self::Approved),
            "Cancelado" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Once approved, a student can't be cancelled. Everything else is allowed,
    /// and moving to the current status is a no-op.
    pub fn transition(self, target: StatusTarget) -> MatriculaResult<Self> {
        let to = Self::from(target);
        ensure!(
            !(self == Self::Approved && to == Self::Cancelled),
            ForbiddenTransitionSnafu { from: self, to }
        );
        Ok(to)
    }
}

impl Display for StudentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for StudentStatus {
    type Error = MatriculaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match Self::parse(&value) {
            Some(status) => Ok(status),
            None => CorruptColumnSnafu {
                column: "status",
                value,
            }
            .fail(),
        }
    }
}

impl StatusTarget {
    pub fn parse(s: &str) -> Option<Self> {
        match StudentStatus::parse(s)? {
            StudentStatus::Pending => None,
            StudentStatus::Approved => Some(Self::Approved),
            StudentStatus::Cancelled => Some(Self::Cancelled),
        }
    }

    /// Reads the `status` field of a status-change body.
    pub fn read(body: &Value) -> MatriculaResult<Self> {
        let mut reader = FieldReader::new(body);
        let target = reader.parsed("status", Presence::Required, 255, STATUS_INVALID, Self::parse);
        reader.finish().into_result()?;
        target.ok_or_else(|| ValidationErrors::single("status", STATUS_INVALID).into())
    }
}

impl From<StatusTarget> for StudentStatus {
    fn from(target: StatusTarget) -> Self {
        match target {
            StatusTarget::Approved => Self::Approved,
            StatusTarget::Cancelled => Self::Cancelled,
        }
    }
}

/// Brazilian taxpayer id: exactly 11 ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Cpf(String);

impl Cpf {
    pub const LEN: usize = 11;

    pub fn parse(s: &str) -> Option<Self> {
        (s.len() == Self::LEN && s.bytes().all(|b| b.is_ascii_digit())).then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Cpf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Cpf {
    type Error = MatriculaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match Self::parse(&value) {
            Some(cpf) => Ok(cpf),
            None => CorruptColumnSnafu { column: "cpf", value }.fail(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Student {
    pub id: Uuid,
    #[serde(rename = "nome")]
    pub name: String,
    pub cpf: Cpf,
    #[serde(rename = "data_nascimento", serialize_with = "serialize_date")]
    pub birth_date: Date,
    #[serde(rename = "turma")]
    pub class: String,
    #[serde(serialize_with = "serialize_email")]
    pub email: Option<EmailAddress>,
    #[serde(rename = "telefone")]
    pub phone: Option<String>,
    #[serde(rename = "curso")]
    pub course: Option<String>,
    pub status: StudentStatus,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(serialize_with = "serialize_timestamp")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub cpf: Cpf,
    pub birth_date: Date,
    pub class: String,
    pub email: Option<EmailAddress>,
    pub phone: Option<String>,
    pub course: Option<String>,
    pub status: StudentStatus,
}

/// A partial update. `None` leaves the column as it is.
#[derive(Debug, Clone, Default)]
pub struct StudentChanges {
    pub name: Option<String>,
    pub cpf: Option<Cpf>,
    pub birth_date: Option<Date>,
    pub class: Option<String>,
    pub email: Option<EmailAddress>,
    pub phone: Option<String>,
    pub course: Option<String>,
}

/// Every field of a student body that survived validation.
#[derive(Debug, Clone, Default)]
pub struct StudentFields {
    pub name: Option<String>,
    pub cpf: Option<Cpf>,
    pub birth_date: Option<Date>,
    pub class: Option<String>,
    pub email: Option<EmailAddress>,
    pub phone: Option<String>,
    pub course: Option<String>,
    pub status: Option<StudentStatus>,
}

impl StudentFields {
    /// Validates a create (`Presence::Required`) or update (`Presence::Sometimes`) body.
    /// Optional columns are always `Sometimes`.
    pub fn read(body: &Value, presence: Presence) -> (Self, ValidationErrors) {
        let mut reader = FieldReader::new(body);

        let fields = Self {
            name: reader.string("nome", presence, 255),
            cpf: reader.parsed(
                "cpf",
                presence,
                usize::MAX,
                "The cpf field must be 11 digits.",
                Cpf::parse,
            ),
            birth_date: reader.date("data_nascimento", presence),
            class: reader.string("turma", presence, 255),
            email: reader.email("email", Presence::Sometimes),
            phone: reader.string("telefone", Presence::Sometimes, 20),
            course: reader.string("curso", Presence::Sometimes, 255),
            status: reader.parsed(
                "status",
                presence,
                255,
                STATUS_INVALID,
                StudentStatus::parse,
            ),
        };

        (fields, reader.finish())
    }

    pub fn into_new_student(self) -> MatriculaResult<NewStudent> {
        match self {
            Self {
                name: Some(name),
                cpf: Some(cpf),
                birth_date: Some(birth_date),
                class: Some(class),
                email,
                phone,
                course,
                status: Some(status),
            } => Ok(NewStudent {
                name,
                cpf,
                birth_date,
                class,
                email,
                phone,
                course,
                status,
            }),
            incomplete => Err(incomplete.missing_required().into()),
        }
    }

    fn missing_required(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::default();
        for (field, missing) in [
            ("nome", self.name.is_none()),
            ("cpf", self.cpf.is_none()),
            ("data_nascimento", self.birth_date.is_none()),
            ("turma", self.class.is_none()),
            ("status", self.status.is_none()),
        ] {
            if missing {
                errors.add(field, format!("The {field} field is required."));
            }
        }
        errors
    }

    /// Splits off the requested status, which isn't changed through a plain update.
    pub fn into_changes(self) -> (StudentChanges, Option<StudentStatus>) {
        let Self {
            name,
            cpf,
            birth_date,
            class,
            email,
            phone,
            course,
            status,
        } = self;

        (
            StudentChanges {
                name,
                cpf,
                birth_date,
                class,
                email,
                phone,
                course,
            },
            status,
        )
    }
}

impl StudentChanges {
    pub fn apply_to(self, student: &mut Student) {
        if let Some(name) = self.name {
            student.name = name;
        }
        if let Some(cpf) = self.cpf {
            student.cpf = cpf;
        }
        if let Some(birth_date) = self.birth_date {
            student.birth_date = birth_date;
        }
        if let Some(class) = self.class {
            student.class = class;
        }
        if let Some(email) = self.email {
            student.email = Some(email);
        }
        if let Some(phone) = self.phone {
            student.phone = Some(phone);
        }
        if let Some(course) = self.course {
            student.course = Some(course);
        }
    }
}

fn serialize_date<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
    let formatted = date
        .format(DATE_FORMAT)
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&formatted)
}

fn serialize_timestamp<S: Serializer>(
    timestamp: &OffsetDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let formatted = timestamp
        .to_offset(UtcOffset::UTC)
        .format(TIMESTAMP_FORMAT)
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&formatted)
}

#[allow(clippy::ref_option)]
fn serialize_email<S: Serializer>(
    email: &Option<EmailAddress>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match email {
        Some(email) => serializer.serialize_some(email.as_str()),
        None => serializer.serialize_none(),
    }
}
