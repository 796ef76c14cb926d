fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use partload_protocol::{
        CompleteRequest, PartUrlRequest, PartUrlResponse, Phase, ProgressSnapshot, StartRequest,
        StartResponse, backend_error,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent comparison).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  Rust:    {reserialized}"
        );
        parsed
    }

    // --- Backend requests ---

    #[test]
    fn fixture_start_request() {
        let req: StartRequest = roundtrip_test("start_request.json");
        assert_eq!(req.file_size_bytes, 26_214_400);
        assert_eq!(req.endpoint_params.len(), 2);
        assert_eq!(req.endpoint_params["collection_name"], "scans");
    }

    #[test]
    fn fixture_start_request_minimal() {
        let req: StartRequest = roundtrip_test("start_request_minimal.json");
        assert!(req.checksum_value.is_none());
        assert!(req.submission_id.is_none());
        assert!(req.endpoint_params.is_empty());
    }

    #[test]
    fn fixture_part_url_request() {
        let req: PartUrlRequest = roundtrip_test("part_url_request.json");
        assert_eq!(req.part_number, 3);
    }

    #[test]
    fn fixture_complete_request() {
        let req: CompleteRequest = roundtrip_test("complete_request.json");
        let numbers: Vec<u32> = req.parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(req.parts.iter().all(|p| !p.etag.contains('"')));
    }

    // --- Backend responses ---

    #[test]
    fn fixture_start_response() {
        let resp: StartResponse = roundtrip_test("start_response.json");
        assert_eq!(resp.file_id.as_deref(), Some("f-91c2"));
        assert_eq!(resp.collection_path.as_deref(), Some("projects/12/scans"));
    }

    #[test]
    fn fixture_part_url_response() {
        let resp: PartUrlResponse = roundtrip_test("part_url_response.json");
        assert!(resp.presigned_url.unwrap().contains("partNumber=3"));
    }

    #[test]
    fn error_response_parses_as_start_response() {
        let fixture = load_fixture("error_response.json");
        assert_eq!(
            backend_error(&fixture).as_deref(),
            Some("Storage quota exceeded")
        );

        let resp: StartResponse = serde_json::from_value(fixture).unwrap();
        assert!(resp.file_id.is_none());
        assert!(resp.upload_id.is_none());
    }

    #[test]
    fn empty_error_field_parses_as_success() {
        let fixture = load_fixture("start_response_empty_error.json");
        assert!(backend_error(&fixture).is_none());

        let resp: StartResponse = serde_json::from_value(fixture).unwrap();
        assert_eq!(resp.file_id.as_deref(), Some("f-91c2"));
        assert_eq!(resp.upload_id.as_deref(), Some("u-2b7e0d"));
    }

    #[test]
    fn falsy_error_values_are_not_errors() {
        let mut fixture = load_fixture("start_response.json");
        for empty in [
            serde_json::json!(""),
            serde_json::json!(false),
            serde_json::json!(0),
            serde_json::json!({}),
            serde_json::json!([]),
        ] {
            fixture["error"] = empty;
            assert!(backend_error(&fixture).is_none(), "error = {}", fixture["error"]);
        }
    }

    #[test]
    fn start_request_sends_each_key_once() {
        let mut req: StartRequest = roundtrip_test("start_request.json");
        req.endpoint_params
            .insert("file_type".into(), serde_json::json!("image/x-tiff"));
        let text = serde_json::to_string(&req).unwrap();
        assert_eq!(text.matches("\"file_type\"").count(), 1);
        assert!(text.contains("image/x-tiff"));
    }

    #[test]
    fn success_responses_carry_no_error() {
        for name in ["start_response.json", "part_url_response.json"] {
            assert!(backend_error(&load_fixture(name)).is_none(), "{name}");
        }
    }

    // --- Progress events ---

    #[test]
    fn fixture_progress_snapshot() {
        let snap: ProgressSnapshot = roundtrip_test("progress_snapshot.json");
        assert_eq!(snap.phase, Phase::Upload);
        assert_eq!(snap.eta_seconds, Some(12));
        assert!(!snap.is_complete());
    }

    #[test]
    fn fixture_progress_snapshot_checksum() {
        let snap: ProgressSnapshot = roundtrip_test("progress_snapshot_checksum.json");
        assert_eq!(snap.phase, Phase::Checksum);
        assert!(snap.eta_seconds.is_none());
    }
}
