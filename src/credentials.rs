use serde_yaml::{Mapping, Value as YamlValue};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

use crate::{config::substitute_env_vars, EtlError, Result};

pub const RDS_ENGINE: &str = "RDS_ENGINE";
pub const RDS_USER: &str = "RDS_USER";
pub const RDS_PASSWORD: &str = "RDS_PASSWORD";
pub const RDS_HOST: &str = "RDS_HOST";
pub const RDS_PORT: &str = "RDS_PORT";
pub const RDS_DATABASE: &str = "RDS_DATABASE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Engine {
    #[default]
    Postgresql,
    Sqlite,
}

impl FromStr for Engine {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Engine::Postgresql),
            "sqlite" => Ok(Engine::Sqlite),
            other => Err(EtlError::Parse(format!(
                "Unsupported {} '{}'. Valid values: postgresql, sqlite",
                RDS_ENGINE, other
            ))),
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Postgresql => write!(f, "postgresql"),
            Engine::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Everything needed to reach the destination database.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Postgres {
        user: String,
        password: String,
        host: String,
        port: u16,
        database: String,
    },
    Sqlite {
        path: PathBuf,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Postgres {
                user,
                host,
                port,
                database,
                ..
            } => f
                .debug_struct("Postgres")
                .field("user", user)
                .field("password", &"***")
                .field("host", host)
                .field("port", port)
                .field("database", database)
                .finish(),
            Credentials::Sqlite { path } => f.debug_struct("Sqlite").field("path", path).finish(),
        }
    }
}

impl Credentials {
    pub fn engine(&self) -> Engine {
        match self {
            Credentials::Postgres { .. } => Engine::Postgresql,
            Credentials::Sqlite { .. } => Engine::Sqlite,
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mapping: Mapping = serde_yaml::from_str(content)?;

        let engine = match scalar(&mapping, RDS_ENGINE)? {
            Some(engine) => engine.parse()?,
            None => Engine::default(),
        };

        match engine {
            Engine::Sqlite => {
                let path = required(&mapping, &[RDS_DATABASE])?.remove(0);
                Ok(Credentials::Sqlite {
                    path: PathBuf::from(path),
                })
            }
            Engine::Postgresql => {
                let mut values = required(
                    &mapping,
                    &[RDS_USER, RDS_PASSWORD, RDS_HOST, RDS_PORT, RDS_DATABASE],
                )?
                .into_iter();
                let mut next = || values.next().unwrap_or_default();

                let user = next();
                let password = next();
                let host = next();
                let port_text = next();
                let database = next();

                let port = port_text.trim().parse::<u16>().map_err(|_| {
                    EtlError::Parse(format!(
                        "{} must be a port number between 0 and 65535, got '{}'",
                        RDS_PORT, port_text
                    ))
                })?;

                Ok(Credentials::Postgres {
                    user,
                    password,
                    host,
                    port,
                    database,
                })
            }
        }
    }

    /// Connection URL for the engine. Contains the password; never log it.
    pub fn connection_url(&self) -> Result<String> {
        match self {
            Credentials::Sqlite { path } => Ok(format!("sqlite:{}", path.display())),
            Credentials::Postgres {
                user,
                password,
                host,
                port,
                database,
            } => {
                let mut url = Url::parse(&format!("postgresql://{}", host)).map_err(|e| {
                    EtlError::Parse(format!("Invalid {} '{}': {}", RDS_HOST, host, e))
                })?;
                let invalid = |field: &str| EtlError::Parse(format!("Invalid {} for host '{}'", field, host));

                url.set_username(user).map_err(|_| invalid(RDS_USER))?;
                url.set_password(Some(password))
                    .map_err(|_| invalid(RDS_PASSWORD))?;
                url.set_port(Some(*port)).map_err(|_| invalid(RDS_PORT))?;
                url.set_path(database);
                Ok(url.to_string())
            }
        }
    }

    /// Human-readable target without the password.
    pub fn describe(&self) -> String {
        match self {
            Credentials::Postgres {
                user,
                host,
                port,
                database,
                ..
            } => format!("postgresql://{}@{}:{}/{}", user, host, port, database),
            Credentials::Sqlite { path } => format!("sqlite:{}", path.display()),
        }
    }
}

/// Reads a YAML credential document, expanding `${VAR}` placeholders first.
pub fn read_credentials<P: AsRef<Path>>(path: P) -> Result<Credentials> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(EtlError::NotFound(format!(
            "Credential file not found: {}",
            path.display()
        )));
    }

    let raw = std::fs::read_to_string(path)?;
    let content = substitute_env_vars(&raw)?;
    Credentials::from_yaml_str(&content)
}

fn scalar(mapping: &Mapping, key: &str) -> Result<Option<String>> {
    match mapping.get(key) {
        None | Some(YamlValue::Null) => Ok(None),
        Some(YamlValue::String(s)) => Ok(Some(s.clone())),
        Some(YamlValue::Number(n)) => Ok(Some(n.to_string())),
        Some(YamlValue::Bool(b)) => Ok(Some(b.to_string())),
        Some(_) => Err(EtlError::Parse(format!("{} must be a scalar value", key))),
    }
}

/// Values for `keys` in order; every absent key is reported in one error.
fn required(mapping: &Mapping, keys: &[&str]) -> Result<Vec<String>> {
    let mut values = Vec::with_capacity(keys.len());
    let mut missing = Vec::new();

    for key in keys {
        match scalar(mapping, key)? {
            Some(value) => values.push(value),
            None => missing.push(*key),
        }
    }

    if !missing.is_empty() {
        return Err(EtlError::Parse(format!(
            "Credential document is missing required keys: {}",
            missing.join(", ")
        )));
    }

    Ok(values)
}
