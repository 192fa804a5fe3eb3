mod core;
mod envelope;
mod params;

pub use core::*;
pub use envelope::ApiResult;
pub use params::*;
