//! Best-effort user settings persistence — a small JSON blob on disk.
//!
//! Both directions tolerate failure: missing or unreadable files load as an
//! empty map, write errors are logged and swallowed. Writes go through a
//! sibling temp file and an atomic rename so readers never observe a torn
//! payload.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::warn;

/// Load the settings map; any failure reads as empty.
pub fn load_settings(path: &Path) -> Map<String, Value> {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<Map<String, Value>>(&raw) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable settings payload");
                Map::new()
            }
        },
        Err(_) => Map::new(),
    }
}

/// Persist the settings map. Errors are logged, never returned.
pub fn save_settings(path: &Path, settings: &Map<String, Value>) {
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(settings)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    })();

    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "settings save failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Map::new();
        settings.insert("tts_enabled".into(), json!(true));
        settings.insert("llm_model".into(), json!("llama-3.2-3b"));
        save_settings(&path, &settings);

        let back = load_settings(&path);
        assert_eq!(back, settings);
    }

    #[test]
    fn missing_file_loads_empty() {
        assert!(load_settings(Path::new("/nonexistent/settings.json")).is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{broken").unwrap();
        assert!(load_settings(&path).is_empty());
    }
}
