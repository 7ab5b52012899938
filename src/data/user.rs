use crate::{
    auth::{PermissionsTarget, TokenDigest},
    error::{CorruptColumnSnafu, MatriculaError},
};
use email_address::EmailAddress;
use secrecy::SecretString;
use serde::{Serialize, Serializer};
use std::fmt::{self, Display};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    /// Manager: full access, including deletes and status changes.
    Gestor,
    /// Staff: can register and edit students.
    Funcionario,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gestor => "Gestor",
            Self::Funcionario => "Funcionario",
        }
    }

    pub fn get_permissions(self) -> PermissionsTarget {
        match self {
            Self::Gestor => PermissionsTarget::all(),
            Self::Funcionario => {
                PermissionsTarget::all()
                    - PermissionsTarget::DELETE_STUDENTS
                    - PermissionsTarget::CHANGE_STUDENT_STATUS
            }
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Role {
    type Error = MatriculaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "Gestor" => Ok(Self::Gestor),
            "Funcionario" => Ok(Self::Funcionario),
            _ => CorruptColumnSnafu {
                column: "perfil",
                value,
            }
            .fail(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    #[serde(serialize_with = "serialize_email")]
    pub email: EmailAddress,
    #[serde(skip)]
    pub bcrypt_hashed_password: SecretString,
    #[serde(rename = "perfil")]
    pub role: Role,
    #[serde(skip)]
    pub access_token: Option<TokenDigest>,
}

impl User {
    pub fn get_permissions(&self) -> PermissionsTarget {
        self.role.get_permissions()
    }
}

pub struct AddUserForm {
    pub name: String,
    pub email: EmailAddress,
    pub bcrypt_hashed_password: SecretString,
    pub role: Role,
}

fn serialize_email<S: Serializer>(email: &EmailAddress, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(email.as_str())
}
