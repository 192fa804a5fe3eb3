mod value;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use value::{Row, Value};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
        }
    }

    /// Fallback column used when an import target has to be created.
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, "String")
    }

    pub fn int64(name: impl Into<String>) -> Self {
        Self::new(name, "Int64")
    }

    pub fn float64(name: impl Into<String>) -> Self {
        Self::new(name, "Float64")
    }

    pub fn nullable(&self) -> bool {
        self.column_type.starts_with("Nullable(")
    }
}

impl From<(&str, &str)> for ColumnDef {
    fn from((name, column_type): (&str, &str)) -> Self {
        Self::new(name, column_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub name: String,
}

/// Everything needed to reach one database on the store. Immutable for the lifetime of a job.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub secure: bool,
    pub auth_token: Option<String>,
}

impl ConnectionDescriptor {
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            username: "default".to_string(),
            password: String::new(),
            secure: false,
            auth_token: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Validation("host is required".into()));
        }
        if self.port == 0 {
            return Err(Error::Validation("port must be between 1 and 65535".into()));
        }
        crate::validation::validate_identifier(&self.database)
            .map_err(|_| Error::Validation(format!("Invalid database name: {}", self.database)))?;
        match self.auth_token.as_deref() {
            Some(token) if !token.trim().is_empty() => Ok(()),
            _ => Err(Error::Validation("jwt is required".into())),
        }
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("secure", &self.secure)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Tables joined left to right; `predicates[i]` joins `tables[i + 1]` onto everything before it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct JoinSpec {
    pub tables: Vec<String>,
    pub predicates: Vec<String>,
}

impl JoinSpec {
    pub fn new(tables: Vec<String>, predicates: Vec<String>) -> Self {
        Self { tables, predicates }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tables.is_empty() {
            return Err(Error::Validation("A join needs at least one table".into()));
        }
        if self.predicates.len() != self.tables.len() - 1 {
            return Err(Error::Validation(format!(
                "Expected {} join conditions for {} tables, got {}",
                self.tables.len() - 1,
                self.tables.len(),
                self.predicates.len()
            )));
        }
        Ok(())
    }
}

/// Single-byte field separator for flat files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Delimiter(u8);

impl Delimiter {
    pub const COMMA: Delimiter = Delimiter(b',');
    pub const TAB: Delimiter = Delimiter(b'\t');

    pub fn as_byte(self) -> u8 {
        self.0
    }
}

impl Default for Delimiter {
    fn default() -> Self {
        Self::COMMA
    }
}

impl FromStr for Delimiter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Ok(Self::COMMA),
            "\t" | "\\t" => Ok(Self::TAB),
            s if s.eq_ignore_ascii_case("tab") => Ok(Self::TAB),
            s => {
                let mut bytes = s.bytes();
                match (bytes.next(), bytes.next()) {
                    (Some(b), None) if b.is_ascii() && b != b'"' && b != b'\n' && b != b'\r' => {
                        Ok(Delimiter(b))
                    }
                    _ => Err(Error::Validation(format!(
                        "Delimiter must be a single character or a tab, got '{}'",
                        s
                    ))),
                }
            }
        }
    }
}

impl TryFrom<String> for Delimiter {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Delimiter> for String {
    fn from(d: Delimiter) -> Self {
        (d.0 as char).to_string()
    }
}
