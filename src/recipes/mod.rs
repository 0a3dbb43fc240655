pub mod types;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

pub use types::{
    fingerprint, ActionKind, ExtractFields, Recipe, RecipeFingerprint, RecipeStep,
    ReplayOutcome,
};

const RECIPE_EXT: &str = "json";

/// One pretty-printed JSON file per fingerprint in a flat directory.
///
/// Writes go to a temporary sibling and are renamed into place, so readers never
/// see a half-written recipe. There is no locking: with two writers on the same
/// fingerprint the last rename wins.
pub struct RecipeStore {
    dir: PathBuf,
}

impl RecipeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", fingerprint, RECIPE_EXT))
    }

    /// Missing or unreadable entries are a cache miss, never an error.
    pub async fn load(&self, fingerprint: &str) -> Option<Recipe> {
        let path = self.path_for(fingerprint);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(fingerprint, "Failed to read recipe {:?}: {}", path, e);
                return None;
            }
        };

        match serde_json::from_slice::<Recipe>(&bytes) {
            Ok(recipe) => {
                info!(
                    fingerprint,
                    times_used = recipe.times_used,
                    success_rate = %recipe.success_rate(),
                    "Loaded recipe"
                );
                Some(recipe)
            }
            Err(e) => {
                warn!(fingerprint, "Corrupt recipe {:?}, treating as miss: {}", path, e);
                None
            }
        }
    }

    /// Full overwrite of the entry keyed by `recipe.fingerprint`.
    pub async fn save(&self, recipe: &Recipe) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create recipes dir {:?}", self.dir))?;

        let path = self.path_for(&recipe.fingerprint);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", recipe.fingerprint, std::process::id()));
        let bytes = serde_json::to_vec_pretty(recipe).context("serialize recipe")?;

        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("write {:?}", tmp))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("rename {:?} -> {:?}", tmp, path))?;

        info!(fingerprint = %recipe.fingerprint, path = ?path, "Saved recipe");
        Ok(())
    }

    /// All parseable recipes, most recently used first.
    pub async fn list(&self) -> Vec<Recipe> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read recipes dir {:?}: {}", self.dir, e);
                }
                return Vec::new();
            }
        };

        let mut recipes = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Error walking recipes dir: {}", e);
                    break;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECIPE_EXT) {
                continue;
            }
            let parsed = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<Recipe>(&bytes).ok(),
                Err(_) => None,
            };
            match parsed {
                Some(recipe) => recipes.push(recipe),
                None => debug!("Skipping unreadable recipe {:?}", path),
            }
        }

        recipes.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        recipes
    }

    /// True iff an entry existed and was removed.
    pub async fn delete(&self, fingerprint: &str) -> bool {
        let path = self.path_for(fingerprint);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(fingerprint, "Deleted recipe");
                true
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(fingerprint, "Failed to delete recipe {:?}: {}", path, e);
                }
                false
            }
        }
    }
}
