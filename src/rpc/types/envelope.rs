use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, ErrorKind};

/// The uniform reply of every operation. Expected failures come back here with `success: false`
/// instead of as transport errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApiResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(rename = "filePath", skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(rename = "insertedCount", skip_serializing_if = "Option::is_none")]
    pub inserted_count: Option<u64>,
    #[serde(rename = "failingBatchIndex", skip_serializing_if = "Option::is_none")]
    pub failing_batch_index: Option<usize>,
    #[serde(rename = "errorKind", skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ApiResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            error_kind: Some(kind),
            ..Self::default()
        }
    }

    /// `detail` carries the debug form of the error and is left out in production.
    pub fn from_error(err: &Error, production: bool) -> Self {
        let mut result = Self::failure(err.kind(), err.to_string());
        if let Error::ImportBatch {
            batch_index,
            inserted_count,
            ..
        } = err
        {
            result.inserted_count = Some(*inserted_count);
            result.failing_batch_index = Some(*batch_index);
        }
        if !production {
            result.detail = Some(format!("{:?}", err));
        }
        result
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_inserted_count(mut self, count: u64) -> Self {
        self.inserted_count = Some(count);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_omits_empty_fields() {
        let result = ApiResult::ok("Connected").with_count(2);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, json!({"success": true, "message": "Connected", "count": 2}));
    }

    #[test]
    fn test_import_batch_error_carries_progress() {
        let err = Error::ImportBatch {
            batch_index: 1,
            inserted_count: 1000,
            message: "boom".into(),
        };
        let json = serde_json::to_value(ApiResult::from_error(&err, true)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["insertedCount"], 1000);
        assert_eq!(json["failingBatchIndex"], 1);
        assert_eq!(json["errorKind"], "importBatch");
        assert!(json.get("detail").is_none());
    }

    #[test]
    fn test_detail_outside_production() {
        let err = Error::FileNotFound("uploads/x.csv".into());
        let result = ApiResult::from_error(&err, false);
        assert_eq!(result.error_kind, Some(ErrorKind::FileNotFound));
        assert!(result.detail.unwrap().contains("FileNotFound"));
    }
}
