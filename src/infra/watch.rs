//! Template file watcher.
//!
//! Watches the template directory on its own thread and maps change events
//! to single-page rebuilds through the static file-name → page-id table.
//! Events for unmapped files are ignored; rapid event bursts are debounced
//! and the source is re-read at handling time, so the last write always
//! wins. A frame change re-renders everything, since every framed body
//! embeds it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tracing::{error, info, warn};

use crate::application::pages::PageCache;
use crate::domain::{template::Template, types::PageId};
use crate::infra::error::InfraError;

const DEBOUNCE_MS: u64 = 300;
const IDLE_TIMEOUT_SECS: u64 = 60;

/// Editor temp/backup artifacts that must not trigger rebuilds.
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

const fn is_relevant(event: &Event) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
}

/// Batches rapid file events so one save does not trigger several rebuilds.
struct Debouncer {
    pending: HashSet<PathBuf>,
    last_event: Option<Instant>,
}

impl Debouncer {
    fn new() -> Self {
        Self {
            pending: HashSet::new(),
            last_event: None,
        }
    }

    fn add(&mut self, event: Event) {
        for path in event.paths {
            if !is_temp_file(&path) {
                self.pending.insert(path);
            }
        }
        self.last_event = Some(Instant::now());
    }

    fn ready(&self) -> bool {
        !self.pending.is_empty()
            && self
                .last_event
                .is_some_and(|t| t.elapsed() >= Duration::from_millis(DEBOUNCE_MS))
    }

    fn take(&mut self) -> Vec<PathBuf> {
        self.last_event = None;
        self.pending.drain().collect()
    }

    fn timeout(&self) -> Duration {
        if self.pending.is_empty() {
            Duration::from_secs(IDLE_TIMEOUT_SECS)
        } else {
            Duration::from_millis(DEBOUNCE_MS)
        }
    }
}

/// Start watching `dir` for template changes. The watcher lives on the
/// spawned thread for the process lifetime; there is no cancellation path
/// other than shutdown.
pub fn spawn(
    dir: PathBuf,
    frame_file: String,
    table: HashMap<String, PageId>,
    cache: Arc<PageCache>,
) -> Result<std::thread::JoinHandle<()>, InfraError> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher =
        notify::recommended_watcher(tx).map_err(|err| InfraError::watch(err.to_string()))?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|err| InfraError::watch(format!("watch {}: {err}", dir.display())))?;
    info!(dir = %dir.display(), "Watching template directory");

    std::thread::Builder::new()
        .name("template-watch".to_string())
        .spawn(move || {
            let _watcher = watcher;
            let mut debouncer = Debouncer::new();

            loop {
                match rx.recv_timeout(debouncer.timeout()) {
                    Ok(Ok(event)) if is_relevant(&event) => debouncer.add(event),
                    Ok(Ok(_)) => {}
                    Ok(Err(error)) => warn!(%error, "File watcher reported an error"),
                    Err(RecvTimeoutError::Timeout) => {
                        if debouncer.ready() {
                            for path in debouncer.take() {
                                handle_change(&path, &frame_file, &table, &cache);
                            }
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .map_err(|err| InfraError::watch(err.to_string()))
}

fn handle_change(
    path: &Path,
    frame_file: &str,
    table: &HashMap<String, PageId>,
    cache: &PageCache,
) {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let is_frame = name == frame_file;
    let page_id = table.get(name);
    if !is_frame && page_id.is_none() {
        return;
    }

    // Re-read at handling time: for bursts of events the latest content wins.
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            warn!(file = name, %error, "Changed template could not be read");
            return;
        }
    };

    let template = match Template::compile(&source) {
        Ok(template) => template,
        Err(error) => {
            error!(file = name, %error, "Template syntax error; previous render function retained");
            return;
        }
    };

    if is_frame {
        cache.rebuild_frame(template);
        info!(file = name, "Reloaded frame template");
    } else if let Some(id) = page_id {
        if cache.rebuild_one(id, template) {
            info!(file = name, page = %id, "Reloaded page template");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn temp_files_are_filtered() {
        assert!(is_temp_file(Path::new("/t/home.html~")));
        assert!(is_temp_file(Path::new("/t/.home.html.swp")));
        assert!(is_temp_file(Path::new("/t/home.html.bak")));
        assert!(!is_temp_file(Path::new("/t/home.html")));
    }

    #[test]
    fn debouncer_waits_for_quiet_period() {
        let mut debouncer = Debouncer::new();
        assert!(!debouncer.ready());

        debouncer.add(Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Any),
            paths: vec![PathBuf::from("/t/home.html")],
            attrs: Default::default(),
        });
        // Just added: the quiet period has not elapsed yet.
        assert!(!debouncer.ready());
        assert_eq!(debouncer.timeout(), Duration::from_millis(DEBOUNCE_MS));

        debouncer.last_event = Some(Instant::now() - Duration::from_millis(DEBOUNCE_MS + 1));
        assert!(debouncer.ready());
        assert_eq!(debouncer.take().len(), 1);
        assert!(!debouncer.ready());
    }

    fn test_cache() -> PageCache {
        let frame = Template::compile("[{{ page }}]").expect("frame");
        let mut templates = HashMap::new();
        templates.insert(
            PageId::new("workers"),
            Template::compile("old").expect("page"),
        );
        let cache = PageCache::new(frame, templates, json!({}), json!({}));
        cache.rebuild_all(json!({}));
        cache
    }

    fn page_table() -> HashMap<String, PageId> {
        let mut table = HashMap::new();
        table.insert("workers.html".to_string(), PageId::new("workers"));
        table
    }

    #[test]
    fn change_event_recompiles_the_mapped_page() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("workers.html");
        std::fs::write(&path, "new").expect("write");

        let cache = test_cache();
        handle_change(&path, "frame.html", &page_table(), &cache);

        let body = cache.get_raw(&PageId::new("workers")).expect("body");
        assert_eq!(&*body, "new");
    }

    #[test]
    fn syntax_error_keeps_previous_render_function() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("workers.html");
        std::fs::write(&path, "{{ broken").expect("write");

        let cache = test_cache();
        handle_change(&path, "frame.html", &page_table(), &cache);

        let body = cache.get_raw(&PageId::new("workers")).expect("body");
        assert_eq!(&*body, "old");
    }

    #[test]
    fn unmapped_file_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("README.md");
        std::fs::write(&path, "not a template").expect("write");

        let cache = test_cache();
        let generation = cache.generation();
        handle_change(&path, "frame.html", &page_table(), &cache);
        assert_eq!(cache.generation(), generation);
    }
}
