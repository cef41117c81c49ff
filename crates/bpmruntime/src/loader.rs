use bpmcore::{ProcessConfig, ProcessConfigStore, Result};
use std::path::{Path, PathBuf};

/// Loads process definitions from `*.json` files in a directory
pub struct ProcessLoader {
    dir: PathBuf,
}

impl ProcessLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Parse one definition file
    pub async fn load_file(path: &Path) -> Result<ProcessConfig> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Store every definition found; returns how many were stored.
    ///
    /// A file that fails to parse or validate is logged and skipped.
    pub async fn load_into(&self, store: &dyn ProcessConfigStore) -> Result<usize> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension() == Some("json".as_ref()) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let config = match Self::load_file(&path).await {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Skipping process file: {}", e);
                    continue;
                }
            };

            let result = if store.exists(&config.public_id).await? {
                store.update(config).await
            } else {
                store.create(config).await
            };
            match result {
                Ok(config) => {
                    tracing::info!(process_id = %config.public_id, path = %path.display(), "Loaded process");
                    loaded += 1;
                }
                Err(e) => tracing::warn!(path = %path.display(), "Rejected process file: {}", e),
            }
        }
        Ok(loaded)
    }
}
