use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, Instant};

/// Quiet period after the last filesystem event before a rescan is suggested.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Watches a scan root and reports, debounced, when the registry should rescan it.
pub struct AssetWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    root: PathBuf,
    debounce: Duration,
    last_event: Option<Instant>,
}

impl AssetWatcher {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_debounce(root, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(root: impl AsRef<Path>, debounce: Duration) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            anyhow::bail!("asset root '{}' is not a directory", root.display());
        }
        let root = normalize_watch_path(root);
        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher
            .configure(
                NotifyConfig::default()
                    .with_compare_contents(false)
                    .with_poll_interval(Duration::from_millis(300)),
            )
            .context("configure asset watcher")?;
        watcher.watch(&root, RecursiveMode::Recursive).with_context(|| format!("watch {}", root.display()))?;
        log::info!(target: "assets", "watching {}", root.display());
        Ok(Self { _watcher: watcher, rx, root, debounce, last_event: None })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True once per burst of relevant events, after the burst has been quiet for the debounce period.
    pub fn poll_dirty(&mut self) -> bool {
        self.poll_at(Instant::now())
    }

    fn poll_at(&mut self, now: Instant) -> bool {
        while let Ok(event) = self.rx.try_recv() {
            match event {
                Ok(event) => {
                    if is_relevant(&event.kind) && event.paths.iter().any(|path| !is_ignored(path)) {
                        self.last_event = Some(now);
                    }
                }
                Err(err) => log::warn!(target: "assets", "asset watcher error: {err}"),
            }
        }
        settle(&mut self.last_event, now, self.debounce)
    }
}

fn settle(last_event: &mut Option<Instant>, now: Instant, debounce: Duration) -> bool {
    match *last_event {
        Some(at) if now.saturating_duration_since(at) >= debounce => {
            *last_event = None;
            true
        }
        _ => false,
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Create(_)
            | EventKind::Remove(_)
    )
}

/// Hidden files, including the temporaries written while replacing a sidecar.
fn is_ignored(path: &Path) -> bool {
    path.file_name().and_then(|name| name.to_str()).is_some_and(|name| name.starts_with('.'))
}

fn normalize_watch_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else if let Ok(cwd) = env::current_dir() {
        cwd.join(path)
    } else {
        path.to_path_buf()
    };
    fs::canonicalize(&absolute).unwrap_or(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind};

    #[test]
    fn metadata_only_events_are_ignored() {
        assert!(is_relevant(&EventKind::Create(CreateKind::File)));
        assert!(is_relevant(&EventKind::Modify(ModifyKind::Data(DataChange::Content))));
        assert!(!is_relevant(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime))));
    }

    #[test]
    fn sidecar_temporaries_are_ignored() {
        assert!(is_ignored(Path::new("/assets/.tex.png.asset.json.tmp")));
        assert!(!is_ignored(Path::new("/assets/tex.png.asset.json")));
    }

    #[test]
    fn settle_waits_for_quiet_period() {
        let start = Instant::now();
        let mut last = Some(start);
        assert!(!settle(&mut last, start + Duration::from_millis(100), Duration::from_millis(250)));
        assert!(settle(&mut last, start + Duration::from_millis(300), Duration::from_millis(250)));
        assert!(!settle(&mut last, start + Duration::from_millis(400), Duration::from_millis(250)));
    }
}
