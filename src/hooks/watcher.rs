//! Filesystem watcher (C10): reloads the hook store whenever a definition
//! file under the watched directory is created, written, removed, or renamed.

use crate::hooks::store::HookStore;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Spawns a background task that watches `dir` and keeps `store` in sync.
/// Renames settle for `settle_delay` before being treated as create+reload,
/// since a rename often arrives as two back-to-back filesystem events.
pub struct HookWatcher {
    _watcher: RecommendedWatcher,
}

impl HookWatcher {
    pub fn start(dir: PathBuf, store: Arc<HookStore>, settle_delay: Duration) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => tracing::warn!(error = %e, "hook directory watch error"),
        })
        .context("failed to create filesystem watcher")?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", dir.display()))?;

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handle_event(&store, &event, settle_delay).await;
            }
        });

        Ok(Self { _watcher: watcher })
    }
}

async fn handle_event(store: &Arc<HookStore>, event: &Event, settle_delay: Duration) {
    match &event.kind {
        EventKind::Remove(_) => {
            for path in &event.paths {
                store.remove_file(path);
            }
        }
        EventKind::Create(_) | EventKind::Modify(_) => {
            if matches!(event.kind, EventKind::Modify(notify::event::ModifyKind::Name(_))) {
                tokio::time::sleep(settle_delay).await;
            }
            for path in &event.paths {
                if !is_definition_file(path) {
                    continue;
                }
                if path.exists() {
                    if let Err(e) = store.reload_file(path) {
                        tracing::warn!(path = %path.display(), error = %e, "hook definition reload failed");
                    }
                } else {
                    store.remove_file(path);
                }
            }
        }
        _ => {}
    }
}

fn is_definition_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_json_files_are_treated_as_definitions() {
        assert!(is_definition_file(Path::new("/hooks/deploy.json")));
        assert!(!is_definition_file(Path::new("/hooks/readme.md")));
        assert!(!is_definition_file(Path::new("/hooks/.deploy.json.swp")));
    }
}
