use serde::{de, Deserialize, Deserializer};
use serde_json::Value;

use crate::config::StoreConfig;
use crate::domain::{ConnectionDescriptor, Delimiter};
use crate::transform::TransformSpec;

/// Accepts `8123` or `"8123"`.
fn de_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| de::Error::custom(format!("invalid port: {}", n))),
        Value::String(s) => s
            .trim()
            .parse::<u16>()
            .map_err(|_| de::Error::custom(format!("invalid port: {}", s))),
        other => Err(de::Error::custom(format!("invalid port: {}", other))),
    }
}

/// Accepts `true` or `"true"`; any other value is false.
fn de_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => s == "true",
        _ => false,
    })
}

/// Connection fields shared by every store operation. They sit at the top level of the params.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    #[serde(deserialize_with = "de_port")]
    pub port: u16,
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub jwt: String,
    #[serde(default, deserialize_with = "de_flag")]
    pub secure: bool,
}

impl ConnectionParams {
    /// Credentials missing from the request come from the store config.
    pub fn descriptor(&self, defaults: &StoreConfig) -> ConnectionDescriptor {
        ConnectionDescriptor::new(self.host.trim(), self.port, self.database.trim())
            .with_credentials(
                self.username.clone().unwrap_or_else(|| defaults.username.clone()),
                self.password.clone().unwrap_or_else(|| defaults.password.clone()),
            )
            .with_token(self.jwt.trim())
            .with_secure(self.secure)
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
}

#[derive(Debug, Deserialize)]
pub struct DescribeTableParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    #[serde(rename = "tableName")]
    pub table_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteQueryParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct PreviewTableParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    #[serde(rename = "tableName")]
    pub table_name: String,
    #[serde(rename = "selectedColumns", alias = "columns", default)]
    pub selected_columns: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ExportTableParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    #[serde(rename = "tableName")]
    pub table_name: String,
    #[serde(rename = "selectedColumns")]
    pub selected_columns: Vec<String>,
    #[serde(rename = "outputFileName")]
    pub output_file_name: String,
    #[serde(default)]
    pub delimiter: Delimiter,
    #[serde(default)]
    pub conditions: Option<String>,
    #[serde(default)]
    pub transform: Option<TransformSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ExportJoinParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub tables: Vec<String>,
    #[serde(rename = "joinConditions")]
    pub join_conditions: Vec<String>,
    #[serde(rename = "selectedColumns")]
    pub selected_columns: Vec<String>,
    #[serde(rename = "outputFileName")]
    pub output_file_name: String,
    #[serde(default)]
    pub delimiter: Delimiter,
    #[serde(default)]
    pub conditions: Option<String>,
    #[serde(default)]
    pub transform: Option<TransformSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ImportFileParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    #[serde(rename = "tableName")]
    pub table_name: String,
    #[serde(rename = "selectedColumns")]
    pub selected_columns: Vec<String>,
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(default)]
    pub delimiter: Delimiter,
    #[serde(default)]
    pub transform: Option<TransformSpec>,
    #[serde(rename = "batchSize", default)]
    pub batch_size: Option<usize>,
    #[serde(rename = "hasHeader", default = "default_true")]
    pub has_header: bool,
}

#[derive(Debug, Deserialize)]
pub struct PreviewFileParams {
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(default)]
    pub delimiter: Delimiter,
    #[serde(rename = "hasHeader", alias = "headers", default = "default_true")]
    pub has_header: bool,
    #[serde(alias = "rows", default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct FileParams {
    #[serde(rename = "filePath")]
    pub file_path: String,
}

fn default_true() -> bool {
    true
}
