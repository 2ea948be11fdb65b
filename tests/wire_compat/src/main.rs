fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use genworker_protocol::{
        Dependency, DependencyKind, EngineResult, EngineSubmission, FinalizeResponse,
        GetTaskResponse, InitUploadRequest, OffsetConflict, SourceKind, UploadAck,
        WholeUploadResponse,
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

    fn parse_fixture<T: serde::de::DeserializeOwned>(name: &str) -> T {
        serde_json::from_value(load_fixture(name))
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"))
    }

    /// Normalizes JSON values so that integer-valued floats compare equal.
    ///
    /// The backend may send `65` where Rust serializes `65.0`.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => v.clone(),
            },
            serde_json::Value::Object(map) => {
                let normalized: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect();
                serde_json::Value::Object(normalized)
            }
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent, float-normalized comparison).
    fn roundtrip_test<T>(name: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  rust: {reserialized}"
        );
    }

    // --- Upload protocol ---

    #[test]
    fn fixture_init_upload_request() {
        roundtrip_test::<InitUploadRequest>("init_upload_request.json");
        let req: InitUploadRequest = parse_fixture("init_upload_request.json");
        assert_eq!(req.resource.task_id, "42");
        assert_eq!(req.total_size, 5_242_880);
    }

    #[test]
    fn fixture_upload_ack() {
        roundtrip_test::<UploadAck>("upload_ack.json");
    }

    #[test]
    fn fixture_upload_ack_string_numbers() {
        let ack: UploadAck = parse_fixture("upload_ack_string_numbers.json");
        assert!(ack.is_ok());
        assert_eq!(ack.uploaded_bytes, 4_194_304);
        assert_eq!(ack.message.as_deref(), Some("resumed"));
    }

    #[test]
    fn fixture_offset_conflict() {
        roundtrip_test::<OffsetConflict>("offset_conflict.json");
    }

    #[test]
    fn fixture_finalize_response() {
        roundtrip_test::<FinalizeResponse>("finalize_response.json");
        let resp: FinalizeResponse = parse_fixture("finalize_response.json");
        assert!(resp.is_ok());
        assert_eq!(resp.size, 5_242_880);
    }

    #[test]
    fn fixture_whole_upload_response() {
        roundtrip_test::<WholeUploadResponse>("whole_upload_response.json");
    }

    // --- Job queue ---

    #[test]
    fn fixture_get_task_response() {
        roundtrip_test::<GetTaskResponse>("get_task_response.json");
        let task = parse_fixture::<GetTaskResponse>("get_task_response.json")
            .into_task()
            .unwrap();
        assert_eq!(task.kind, "upscale_video");
        assert!(task.payload()["dependency"].is_array());
    }

    #[test]
    fn fixture_get_task_integer_id() {
        let task = parse_fixture::<GetTaskResponse>("get_task_integer_id.json")
            .into_task()
            .unwrap();
        assert_eq!(task.id, "1337");
        assert!(task.payload().is_empty());
    }

    // --- Engine ---

    #[test]
    fn fixture_engine_submission() {
        roundtrip_test::<EngineSubmission>("engine_submission.json");
    }

    #[test]
    fn fixture_engine_result() {
        roundtrip_test::<EngineResult>("engine_result.json");
        let result: EngineResult = parse_fixture("engine_result.json");
        assert_eq!(result.images[0].decode().unwrap().unwrap(), b"Hello");
        assert_eq!(result.images[1].filename(), Some("frame.webp"));
    }

    // --- Dependencies ---

    #[test]
    fn fixture_dependency_files() {
        roundtrip_test::<Dependency>("dependency_files.json");
        let dep: Dependency = parse_fixture("dependency_files.json");
        assert_eq!(dep.url_type, SourceKind::BackendFiles);
        assert_eq!(dep.target_kind(), Some(DependencyKind::Loras));
        assert_eq!(dep.files.len(), 2);
    }

    #[test]
    fn fixture_dependency_civitai() {
        roundtrip_test::<Dependency>("dependency_civitai.json");
        let dep: Dependency = parse_fixture("dependency_civitai.json");
        assert_eq!(dep.url_type, SourceKind::Civitai);
        assert_eq!(dep.file_name.as_deref(), Some("model.safetensors"));
    }
}
