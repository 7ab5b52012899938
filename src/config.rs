use crate::{
    data::user::Role,
    error::{
        BadEnvVarSnafu, EmailSnafu, MatriculaResult, ParseEnvNumberSnafu,
        UnknownStoreBackendSnafu,
    },
};
use email_address::EmailAddress;
use secrecy::{ExposeSecret, SecretString};
use snafu::ResultExt;
use std::{env::VarError, str::FromStr, sync::Arc};

const DEFAULT_SERVER_IP: &str = "127.0.0.1:8080";
const DEFAULT_MAX_CONNECTIONS: u32 = 15;

#[derive(Clone, Debug)]
pub struct RuntimeConfiguration {
    store: StoreBackend,
    server_ip: String,
    cors_origin: Option<String>,
    bcrypt_cost: u32,
    bootstrap_accounts: Arc<[BootstrapAccount]>,
}

#[derive(Clone, Debug)]
pub enum StoreBackend {
    Postgres(Arc<DbConfig>),
    Memory,
}

impl RuntimeConfiguration {
    pub fn new() -> MatriculaResult<Self> {
        Self::from_lookup(dotenvy::var)
    }

    pub fn from_lookup(
        lookup: impl Fn(&'static str) -> Result<String, dotenvy::Error>,
    ) -> MatriculaResult<Self> {
        let get_optional = |name| optional(&lookup, name);

        let store = match get_optional("MATRICULA_STORE")?.as_deref() {
            None | Some("postgres") => StoreBackend::Postgres(Arc::new(DbConfig::new(&lookup)?)),
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return UnknownStoreBackendSnafu {
                    found: other.to_string(),
                }
                .fail();
            }
        };

        let bcrypt_cost = match get_optional("MATRICULA_BCRYPT_COST")? {
            Some(cost) => cost.parse().context(ParseEnvNumberSnafu {
                name: "MATRICULA_BCRYPT_COST",
            })?,
            None => bcrypt::DEFAULT_COST,
        };

        let bootstrap_accounts = [
            BootstrapAccount::new(&lookup, Role::Gestor)?,
            BootstrapAccount::new(&lookup, Role::Funcionario)?,
        ]
        .into_iter()
        .flatten()
        .collect();

        Ok(Self {
            store,
            server_ip: get_optional("MATRICULA_SERVER_IP")?
                .unwrap_or_else(|| DEFAULT_SERVER_IP.to_string()),
            cors_origin: get_optional("MATRICULA_CORS_ORIGIN")?,
            bcrypt_cost,
            bootstrap_accounts,
        })
    }

    pub fn store(&self) -> &StoreBackend {
        &self.store
    }

    pub fn server_ip(&self) -> &str {
        &self.server_ip
    }

    pub fn cors_origin(&self) -> Option<&str> {
        self.cors_origin.as_deref()
    }

    pub const fn bcrypt_cost(&self) -> u32 {
        self.bcrypt_cost
    }

    pub fn bootstrap_accounts(&self) -> &[BootstrapAccount] {
        &self.bootstrap_accounts
    }
}

fn optional(
    lookup: &impl Fn(&'static str) -> Result<String, dotenvy::Error>,
    name: &'static str,
) -> MatriculaResult<Option<String>> {
    match lookup(name) {
        Ok(value) => Ok(Some(value)),
        Err(dotenvy::Error::EnvVar(VarError::NotPresent)) => Ok(None),
        Err(source) => Err(source).context(BadEnvVarSnafu { name }),
    }
}

#[derive(Debug)]
pub struct DbConfig {
    user: String,
    password: SecretString,
    path: String,
    port: u16,
    database: String,
    max_connections: u32,
}

impl DbConfig {
    fn new(lookup: &impl Fn(&'static str) -> Result<String, dotenvy::Error>) -> MatriculaResult<Self> {
        let get_env_var = |name| lookup(name).context(BadEnvVarSnafu { name });

        let max_connections = match optional(lookup, "DB_MAX_CONNECTIONS")? {
            Some(max) => max.parse().context(ParseEnvNumberSnafu {
                name: "DB_MAX_CONNECTIONS",
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            user: get_env_var("DB_USER")?,
            password: SecretString::from(get_env_var("DB_PASSWORD")?),
            path: get_env_var("DB_PATH")?,
            port: get_env_var("DB_PORT")?
                .parse()
                .context(ParseEnvNumberSnafu { name: "DB_PORT" })?,
            database: get_env_var("DB_NAME")?,
            max_connections,
        })
    }

    pub fn get_db_path(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user,
            self.password.expose_secret(),
            self.path,
            self.port,
            self.database
        )
    }

    pub const fn max_connections(&self) -> u32 {
        self.max_connections
    }
}

/// An account created at startup if nobody with its email exists yet.
#[derive(Debug)]
pub struct BootstrapAccount {
    pub name: String,
    pub email: EmailAddress,
    pub password: SecretString,
    pub role: Role,
}

impl BootstrapAccount {
    fn new(
        lookup: &impl Fn(&'static str) -> Result<String, dotenvy::Error>,
        role: Role,
    ) -> MatriculaResult<Option<Self>> {
        let (email_var, password_var, name_var, default_name) = match role {
            Role::Gestor => (
                "MATRICULA_BOOTSTRAP_GESTOR_EMAIL",
                "MATRICULA_BOOTSTRAP_GESTOR_PASSWORD",
                "MATRICULA_BOOTSTRAP_GESTOR_NAME",
                "Gestor",
            ),
            Role::Funcionario => (
                "MATRICULA_BOOTSTRAP_FUNCIONARIO_EMAIL",
                "MATRICULA_BOOTSTRAP_FUNCIONARIO_PASSWORD",
                "MATRICULA_BOOTSTRAP_FUNCIONARIO_NAME",
                "Funcionário",
            ),
        };

        let Some(email) = optional(lookup, email_var)? else {
            return Ok(None);
        };
        let email = EmailAddress::from_str(&email).context(EmailSnafu { original: email })?;
        let password = lookup(password_var).context(BadEnvVarSnafu { name: password_var })?;
        let name = optional(lookup, name_var)?.unwrap_or_else(|| default_name.to_string());

        Ok(Some(Self {
            name,
            email,
            password: SecretString::from(password),
            role,
        }))
    }
}
