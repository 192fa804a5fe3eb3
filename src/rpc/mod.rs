mod http;
mod methods;
mod serve;
pub mod types;

pub use http::router;
pub use methods::{RpcMethods, METHODS};
pub use serve::{respond, serve_lines};
pub use types::{ApiResult, ErrorCode, RpcRequest, RpcResponse};
