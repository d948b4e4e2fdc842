fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use docdrop_protocol::{FileSpec, UploadEvent};
    use docdrop_upload::{EngineConfig, ErrorClassifier, RawFailure, RecoveryCoordinator};

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

    /// Normalizes JSON values so that integer-valued floats compare equal.
    ///
    /// Front ends written in JavaScript emit `30` where serde writes `30.0`.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    serde_json::json!(f)
                } else {
                    v.clone()
                }
            }
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
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  Rust:    {reserialized}"
        );
        parsed
    }

    // --- Event stream ---

    #[test]
    fn fixture_session_started() {
        let event = roundtrip_test::<UploadEvent>("session_started.json");
        assert_eq!(event.name(), "session-started");
        assert!(event.job_id().is_none());
    }

    #[test]
    fn fixture_job_progress() {
        match roundtrip_test::<UploadEvent>("job_progress.json") {
            UploadEvent::JobProgress {
                loaded, percent, ..
            } => {
                assert_eq!(loaded, 300_000);
                assert_eq!(percent, 30.0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn fixture_job_retrying() {
        let event = roundtrip_test::<UploadEvent>("job_retrying.json");
        assert_eq!(event.name(), "job-retrying");
        assert_eq!(event.job_id().map(|id| id.as_str()), Some("j-1"));
    }

    #[test]
    fn fixture_job_error_conflict() {
        roundtrip_test::<UploadEvent>("job_error_conflict.json");
    }

    #[test]
    fn fixture_session_complete() {
        match roundtrip_test::<UploadEvent>("session_complete.json") {
            UploadEvent::SessionComplete { results, .. } => {
                assert!(results[0].succeeded());
                assert!(results[0].error.is_none());
                assert!(!results[1].succeeded());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // --- Classifier output ---

    #[test]
    fn classifier_conflict_matches_fixture() {
        let fixture = load_fixture("job_error_conflict.json");
        let classified = ErrorClassifier::default().classify(&RawFailure::AlreadyExists {
            name: "report.pdf".into(),
        });
        assert_eq!(
            serde_json::to_value(&classified).unwrap(),
            fixture["classifiedError"]
        );
    }

    #[test]
    fn exhausted_timeout_matches_fixture() {
        let fixture = load_fixture("session_complete.json");
        let recovery = RecoveryCoordinator::new();
        let classified = ErrorClassifier::default().classify(&RawFailure::Timeout);
        let reported = recovery.surfaced(&recovery.exhausted(classified, 3));
        assert_eq!(
            serde_json::to_value(&reported).unwrap(),
            fixture["results"][1]["error"]
        );
    }

    // --- Inputs and configuration ---

    #[test]
    fn fixture_file_spec() {
        let spec = roundtrip_test::<FileSpec>("file_spec.json");
        assert_eq!(spec.size_bytes, 2048);
    }

    #[test]
    fn fixture_engine_config_is_default() {
        let config = roundtrip_test::<EngineConfig>("engine_config.json");
        assert_eq!(config, EngineConfig::default());
    }
}
