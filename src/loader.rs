use std::path::{Path, PathBuf};

use crate::config::FirewallConfig;
use crate::parser::parse_rules_document;
use crate::store::RuleStore;

/// Builds fresh rule stores from the rule directories.
///
/// One writable directory (watched by the caller) plus an ordered list of
/// read-only directories, all scanned for files named `*.xml` — exactly
/// that suffix, so tools can stage temporary files and atomically rename
/// them into place. A file that fails to read or parse is dropped with a
/// log line; loading itself never fails.
#[derive(Debug, Clone)]
pub struct RuleLoader {
    rules_dir: PathBuf,
    system_dirs: Vec<PathBuf>,
}

impl RuleLoader {
    pub fn new(config: &FirewallConfig) -> Self {
        Self {
            rules_dir: config.rules_dir.clone(),
            system_dirs: config.system_rules_dirs.clone(),
        }
    }

    pub fn rules_dir(&self) -> &Path {
        &self.rules_dir
    }

    /// Read every rule file and assemble a store. Runs entirely off the
    /// dispatch path; the caller decides when to publish the result.
    pub fn load(&self) -> RuleStore {
        let mut rules = Vec::new();
        for dir in std::iter::once(&self.rules_dir).chain(self.system_dirs.iter()) {
            for file in list_rule_files(dir) {
                let content = match std::fs::read_to_string(&file) {
                    Ok(content) => content,
                    Err(e) => {
                        tracing::error!(file = %file.display(), error = %e, "failed to read rule file");
                        continue;
                    }
                };
                match parse_rules_document(&content) {
                    Ok(outcome) => {
                        for err in &outcome.dropped {
                            tracing::warn!(
                                file = %file.display(),
                                error = %err,
                                "rule discarded during load"
                            );
                        }
                        rules.extend(outcome.rules);
                    }
                    Err(e) => {
                        tracing::error!(
                            file = %file.display(),
                            error = %e,
                            "discarding unreadable rule file"
                        );
                    }
                }
            }
        }

        let store = RuleStore::from_rules(rules);
        let counts = store.counts();
        tracing::info!(
            activity = counts.activity,
            broadcast = counts.broadcast,
            service = counts.service,
            provider = counts.provider,
            package = counts.package,
            "loaded intent firewall rules"
        );
        store
    }
}

/// Entries of `dir` whose name ends in `.xml`, sorted by name. A missing or
/// unreadable directory yields nothing; the read-only directories in
/// particular need not exist on every device.
fn list_rule_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "rules directory not readable");
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".xml"))
        })
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn loader_for(dirs: &[&Path]) -> RuleLoader {
        let (rules_dir, system_dirs) = dirs.split_first().expect("at least one dir");
        RuleLoader {
            rules_dir: rules_dir.to_path_buf(),
            system_dirs: system_dirs.iter().map(|d| d.to_path_buf()).collect(),
        }
    }

    #[test]
    fn loads_only_xml_suffixed_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.xml"),
            r#"<rules><broadcast block="true" matchall="true"/></rules>"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("staged.xml.tmp"),
            r#"<rules><broadcast block="true" matchall="true"/></rules>"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "not rules").unwrap();

        let store = loader_for(&[dir.path()]).load();
        assert_eq!(store.counts().broadcast, 1);
    }

    #[test]
    fn unions_writable_and_system_dirs() {
        let writable = tempfile::tempdir().unwrap();
        let system = tempfile::tempdir().unwrap();
        fs::write(
            writable.path().join("w.xml"),
            r#"<rules><activity block="true" matchall="true"/></rules>"#,
        )
        .unwrap();
        fs::write(
            system.path().join("s.xml"),
            r#"<rules><service block="true" matchall="true"/></rules>"#,
        )
        .unwrap();

        let store = loader_for(&[writable.path(), system.path()]).load();
        let counts = store.counts();
        assert_eq!(counts.activity, 1);
        assert_eq!(counts.service, 1);
    }

    #[test]
    fn malformed_file_is_discarded_whole() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("bad.xml"),
            r#"<wrong-root><broadcast block="true" matchall="true"/></wrong-root>"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("good.xml"),
            r#"<rules><broadcast block="true" matchall="true"/></rules>"#,
        )
        .unwrap();

        let store = loader_for(&[dir.path()]).load();
        assert_eq!(store.counts().broadcast, 1);
    }

    #[test]
    fn missing_directories_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let store = loader_for(&[missing.as_path()]).load();
        let counts = store.counts();
        assert_eq!(
            counts.activity + counts.broadcast + counts.service + counts.provider + counts.package,
            0
        );
    }

    #[test]
    fn reload_of_unchanged_directory_is_equivalent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.xml"),
            r#"<rules>
                 <activity block="true"><component-filter name="com.x/.Main"/></activity>
                 <package pkgName="com.y" blockquery="true"/>
               </rules>"#,
        )
        .unwrap();

        let loader = loader_for(&[dir.path()]);
        let first = loader.load();
        let second = loader.load();
        assert_eq!(first.counts(), second.counts());
    }
}
