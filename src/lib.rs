pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod flatfile;
pub mod metrics;
pub mod query;
pub mod rpc;
pub mod session;
pub mod transfer;
pub mod transform;
pub mod validation;

pub use config::{Config, LogFormat, SecurityConfig, StoreConfig, TransferConfig};
pub use domain::{ColumnDef, ConnectionDescriptor, Delimiter, JoinSpec, Row, TableInfo, Value};
pub use error::{Error, ErrorKind, Result};
pub use executor::{Connector, ExecutorMode, QueryResult, StoreBackend};
pub use rpc::{ApiResult, RpcMethods};
pub use session::Session;
pub use transfer::{
    ExportJob, ExportOutcome, ImportJob, ImportOutcome, JobDirection, JobEvent, JobHandle,
    JobState, JoinExportJob, TransferEngine, TransferJob,
};
pub use transform::{CastPolicy, CastType, Filter, FilterOperator, TransformSpec};
