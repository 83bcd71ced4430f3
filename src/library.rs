// Shared script library.
//
// Profiles may reference a named script instead of carrying their own
// source. The library is loaded once at startup from a directory of
// `*.rhai` files, file stem = library id.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct ScriptLibrary {
    scripts: HashMap<String, String>,
}

impl ScriptLibrary {
    /// Load every readable `*.rhai` file under `dir`. A missing directory
    /// or an unreadable file is logged and skipped, never fatal.
    pub fn load_dir(dir: &Path) -> Self {
        let mut scripts = HashMap::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "script library directory unavailable");
                return Self::default();
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("rhai") {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };
            match std::fs::read_to_string(&path) {
                Ok(source) => {
                    scripts.insert(stem, source);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable library script")
                }
            }
        }
        info!(scripts = scripts.len(), "script library loaded");
        Self { scripts }
    }

    pub fn insert(&mut self, id: impl Into<String>, source: impl Into<String>) {
        self.scripts.insert(id.into(), source.into());
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.scripts.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}
