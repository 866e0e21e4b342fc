use std::path::Path;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// How long to sit on a change notification before reloading. A tool
/// swapping a rule file produces a burst (delete, create, write, close);
/// every arriving event restarts this window so the burst collapses into a
/// single reload.
pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(250);

/// Serial reload executor with debouncing.
///
/// All reloads run on one dedicated thread, so the loader is never
/// re-entrant; `schedule` can be called from any thread and never blocks.
#[derive(Clone)]
pub struct ReloadScheduler {
    tx: Sender<()>,
}

impl ReloadScheduler {
    pub fn spawn<F>(mut reload: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (tx, rx) = channel::<()>();
        std::thread::Builder::new()
            .name("ifw-reload".to_string())
            .spawn(move || {
                while rx.recv().is_ok() {
                    loop {
                        match rx.recv_timeout(DEBOUNCE_DELAY) {
                            // Another event inside the window: restart it.
                            Ok(()) => continue,
                            Err(RecvTimeoutError::Timeout) => break,
                            Err(RecvTimeoutError::Disconnected) => {
                                // Events were observed; run the final reload
                                // before shutting the executor down.
                                reload();
                                return;
                            }
                        }
                    }
                    reload();
                }
            })
            .context("failed to spawn reload executor thread")?;
        Ok(Self { tx })
    }

    pub fn schedule(&self) {
        let _ = self.tx.send(());
    }
}

/// Watches the writable rules directory and feeds `.xml` changes into the
/// reload scheduler. The watcher callback does no parsing; it only filters
/// and forwards. Dropping the handle stops watching.
pub struct RuleWatcher {
    _watcher: RecommendedWatcher,
}

impl RuleWatcher {
    pub fn start(dir: &Path, scheduler: ReloadScheduler) -> Result<Self> {
        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
                match result {
                    Ok(event) => {
                        if !matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        ) {
                            return;
                        }
                        if event.paths.iter().any(|p| is_rule_file(p)) {
                            scheduler.schedule();
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "rules directory watch error");
                    }
                }
            })
            .context("failed to create rules directory watcher")?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch rules directory {}", dir.display()))?;
        tracing::info!(dir = %dir.display(), "watching rules directory");
        Ok(Self { _watcher: watcher })
    }
}

fn is_rule_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(".xml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_scheduler() -> (ReloadScheduler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let scheduler = ReloadScheduler::spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        (scheduler, count)
    }

    #[test]
    fn burst_collapses_to_one_reload() {
        let (scheduler, count) = counting_scheduler();
        for _ in 0..8 {
            scheduler.schedule();
            std::thread::sleep(Duration::from_millis(20));
        }
        std::thread::sleep(DEBOUNCE_DELAY + Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn separated_events_each_reload() {
        let (scheduler, count) = counting_scheduler();
        scheduler.schedule();
        std::thread::sleep(DEBOUNCE_DELAY + Duration::from_millis(200));
        scheduler.schedule();
        std::thread::sleep(DEBOUNCE_DELAY + Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reloads_are_serial() {
        // Each reload sleeps; overlapping executions would interleave the
        // enter/exit marks.
        let marks = Arc::new(std::sync::Mutex::new(Vec::new()));
        let inner = Arc::clone(&marks);
        let scheduler = ReloadScheduler::spawn(move || {
            inner.lock().unwrap().push("enter");
            std::thread::sleep(Duration::from_millis(50));
            inner.lock().unwrap().push("exit");
        })
        .unwrap();

        scheduler.schedule();
        std::thread::sleep(DEBOUNCE_DELAY + Duration::from_millis(100));
        scheduler.schedule();
        std::thread::sleep(DEBOUNCE_DELAY + Duration::from_millis(200));

        let marks = marks.lock().unwrap();
        assert_eq!(marks.as_slice(), ["enter", "exit", "enter", "exit"]);
    }

    #[test]
    fn xml_writes_trigger_reload() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, count) = counting_scheduler();
        let _watcher = RuleWatcher::start(dir.path(), scheduler).unwrap();

        std::fs::write(
            dir.path().join("r.xml"),
            r#"<rules><broadcast block="true" matchall="true"/></rules>"#,
        )
        .unwrap();

        // Generous wait: watcher delivery plus the debounce window.
        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while count.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_xml_writes_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, count) = counting_scheduler();
        let _watcher = RuleWatcher::start(dir.path(), scheduler).unwrap();

        std::fs::write(dir.path().join("staged.tmp"), "scratch").unwrap();
        std::thread::sleep(DEBOUNCE_DELAY + Duration::from_millis(400));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rule_file_suffix_is_exact() {
        assert!(is_rule_file(Path::new("/x/a.xml")));
        assert!(!is_rule_file(Path::new("/x/a.xml.tmp")));
        assert!(!is_rule_file(Path::new("/x/a.XML")));
    }
}
