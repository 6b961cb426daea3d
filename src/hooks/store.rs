//! In-memory hook definition store (C5): one file on disk maps to zero or
//! more hook definitions. Ids must be unique across the whole store.

use crate::hooks::def::{find_duplicate_id, parse_definitions, HookDef};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read hook definition file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
    #[error("{path}: duplicate hook id `{id}` also defined in another file")]
    DuplicateId { path: PathBuf, id: String },
}

/// Thread-safe registry of hook definitions, keyed by the file they were
/// loaded from. Mirrors the `DashMap`-backed concurrent-map idiom used for
/// rate limiting elsewhere in this crate.
#[derive(Debug, Default)]
pub struct HookStore {
    by_file: DashMap<PathBuf, Vec<HookDef>>,
    templating_enabled: bool,
}

impl HookStore {
    pub fn new(templating_enabled: bool) -> Self {
        Self {
            by_file: DashMap::new(),
            templating_enabled,
        }
    }

    /// Reload a single file's definitions. On success, replaces whatever was
    /// previously loaded from that path. On a duplicate-id conflict with any
    /// *other* file, the previous contents for `path` are left untouched and
    /// an error is returned — one bad file never corrupts the rest of the
    /// store.
    pub fn reload_file(&self, path: &Path) -> Result<(), StoreError> {
        let raw = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let hooks = parse_definitions(&raw, self.templating_enabled).map_err(|reason| StoreError::Invalid {
            path: path.to_path_buf(),
            reason,
        })?;

        let other_ids: Vec<String> = self
            .by_file
            .iter()
            .filter(|entry| entry.key() != path)
            .flat_map(|entry| entry.value().iter().map(|h| h.id.clone()).collect::<Vec<_>>())
            .collect();

        if let Some(dup) = find_duplicate_id(&hooks, &other_ids) {
            return Err(StoreError::DuplicateId {
                path: path.to_path_buf(),
                id: dup.to_string(),
            });
        }

        self.by_file.insert(path.to_path_buf(), hooks);
        Ok(())
    }

    pub fn remove_file(&self, path: &Path) {
        self.by_file.remove(path);
    }

    /// Reload every currently-tracked file plus any newly-discovered ones in
    /// `paths`. Every path is attempted regardless of earlier failures; the
    /// last error encountered (if any) is returned after the full pass.
    pub fn reload_all(&self, paths: &[PathBuf]) -> Result<(), StoreError> {
        let mut last_err = None;
        for path in paths {
            if let Err(e) = self.reload_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to reload hook definition file");
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// All hooks across all loaded files, in no particular cross-file order.
    pub fn all(&self) -> Vec<HookDef> {
        self.by_file
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }

    pub fn find_by_id(&self, id: &str) -> Option<HookDef> {
        self.by_file
            .iter()
            .find_map(|entry| entry.value().iter().find(|h| h.id == id).cloned())
    }

    pub fn loaded_file_count(&self) -> usize {
        self.by_file.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("forgehook-store-test-{}.json", uuid::Uuid::new_v4()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn hook_json(id: &str) -> String {
        format!(
            r#"[{{"id":"{id}","executeCommand":"/bin/true","workingDirectory":"/tmp","triggerRule":{{"type":"match","source":"header","name":"X","op":"equals","value":"y"}}}}]"#
        )
    }

    #[test]
    fn reload_file_then_find_by_id_round_trips() {
        let store = HookStore::new(false);
        let path = write_temp(&hook_json("alpha"));
        store.reload_file(&path).unwrap();
        assert!(store.find_by_id("alpha").is_some());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn duplicate_id_across_files_is_rejected_and_original_retained() {
        let store = HookStore::new(false);
        let path_a = write_temp(&hook_json("shared"));
        let path_b = write_temp(&hook_json("shared"));
        store.reload_file(&path_a).unwrap();

        let err = store.reload_file(&path_b).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { .. }));
        assert_eq!(store.loaded_file_count(), 1);

        std::fs::remove_file(&path_a).unwrap();
        std::fs::remove_file(&path_b).unwrap();
    }

    #[test]
    fn remove_file_drops_its_hooks() {
        let store = HookStore::new(false);
        let path = write_temp(&hook_json("gamma"));
        store.reload_file(&path).unwrap();
        store.remove_file(&path);
        assert!(store.find_by_id("gamma").is_none());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn reload_all_attempts_every_path_and_surfaces_last_error() {
        let store = HookStore::new(false);
        let good = write_temp(&hook_json("ok"));
        let bad = write_temp("not json");

        let err = store.reload_all(&[good.clone(), bad.clone()]).unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
        assert!(store.find_by_id("ok").is_some());

        std::fs::remove_file(&good).unwrap();
        std::fs::remove_file(&bad).unwrap();
    }
}
