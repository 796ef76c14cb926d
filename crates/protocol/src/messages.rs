use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens a multipart upload session (START).
///
/// `endpoint_params` is caller-supplied and flattened into the top-level
/// object, so keys like `collection_name` travel next to the file metadata.
/// On a key collision the endpoint parameter wins.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StartRequest {
    pub file_name: String,
    pub file_type: String,
    pub file_size_bytes: u64,
    #[serde(default)]
    pub checksum_value: Option<String>,
    #[serde(default)]
    pub submission_id: Option<String>,
    #[serde(flatten)]
    pub endpoint_params: Map<String, Value>,
}

impl StartRequest {
    /// The JSON object sent to the backend, with each key present once.
    pub fn to_body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("file_name".into(), Value::from(self.file_name.as_str()));
        body.insert("file_type".into(), Value::from(self.file_type.as_str()));
        body.insert("file_size_bytes".into(), Value::from(self.file_size_bytes));
        if let Some(checksum) = &self.checksum_value {
            body.insert("checksum_value".into(), Value::from(checksum.as_str()));
        }
        if let Some(submission_id) = &self.submission_id {
            body.insert("submission_id".into(), Value::from(submission_id.as_str()));
        }
        for (key, value) in &self.endpoint_params {
            body.insert(key.clone(), value.clone());
        }
        body
    }
}

impl Serialize for StartRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_body().serialize(serializer)
    }
}

/// Asks the backend for a presigned PUT URL for one part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartUrlRequest {
    pub file_id: String,
    pub upload_id: String,
    pub part_number: u32,
}

/// One finished part as the storage backend expects it at completion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Finalizes the multipart upload (COMPLETE).
///
/// `parts` must be sorted ascending by part number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub file_id: String,
    pub upload_id: String,
    pub parts: Vec<CompletedPart>,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_path: Option<String>,
    pub content_type: String,
    pub checksum: String,
    pub final_file_size: u64,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Response to START.
///
/// Identifiers are optional on the wire; their absence is a contract
/// violation that the caller must reject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_path: Option<String>,
}

/// Response to a part URL request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartUrlResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_url: Option<String>,
}

/// Extracts the backend-reported business error from a JSON response.
///
/// Returns `None` when the `error` field is absent or empty: `null`, `""`,
/// `false`, `0`, `{}` and `[]` all mean "no error". String errors are
/// returned verbatim; any other JSON value is returned in its compact
/// serialized form.
pub fn backend_error(body: &Value) -> Option<String> {
    match body.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        Value::Array(a) if a.is_empty() => None,
        Value::Object(o) if o.is_empty() => None,
        other => Some(other.to_string()),
    }
}
