//! Config file watcher for credential hot reload.
//!
//! The parent directory is watched rather than the file itself: editors and
//! deploy tools usually replace the file with a rename, which a watch on the
//! old inode never reports.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;

/// Emits a freshly loaded [`GatewayConfig`] each time the file changes.
///
/// Invalid edits are logged and skipped; the receiver only ever sees
/// configs that passed validation.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            updates,
        };
        (watcher, rx)
    }

    /// Start watching. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(OsString::from);
        let path = self.path.clone();
        let updates = self.updates;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = (event.kind.is_modify() || event.kind.is_create())
                        && touches(&event, file_name.as_deref());
                    if relevant {
                        reload(&path, &updates);
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

fn touches(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    let Some(name) = file_name else {
        return false;
    };
    event.paths.iter().any(|p| p.file_name() == Some(name))
}

fn reload(path: &Path, updates: &mpsc::UnboundedSender<GatewayConfig>) {
    match load_config(path) {
        Ok(config) => {
            tracing::info!(path = ?path, "Config reloaded");
            let _ = updates.send(config);
        }
        // Partially written files land here too; the next write event retries.
        Err(e) => tracing::warn!(path = ?path, error = %e, "Config reload rejected, keeping current"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, EventKind};

    #[test]
    fn only_events_for_the_config_file_count() {
        let ours = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/panda/gateway.toml"));
        let other = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/panda/gateway.toml.swp"));

        let name = std::ffi::OsStr::new("gateway.toml");
        assert!(touches(&ours, Some(name)));
        assert!(!touches(&other, Some(name)));
        assert!(!touches(&ours, None));
    }

    #[test]
    fn invalid_reload_is_not_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "[websocket]\nchat_path = \"no-slash\"\n").unwrap();

        let (watcher, mut rx) = ConfigWatcher::new(&path);
        reload(&path, &watcher.updates);
        assert!(rx.try_recv().is_err());

        std::fs::write(&path, "[auth]\nuser = \"panda\"\n").unwrap();
        reload(&path, &watcher.updates);
        assert_eq!(rx.try_recv().unwrap().auth.user, "panda");
    }
}
