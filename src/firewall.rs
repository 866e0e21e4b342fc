use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use crate::audit::{join_packages, AuditSink, IntentAuditRecord};
use crate::config::FirewallConfig;
use crate::filter::{CallContext, PackageQuery};
use crate::intent::{ComponentName, Intent};
use crate::loader::RuleLoader;
use crate::provider::{FirewallCtx, HostServices, IdentityGuard, PackageProvider};
use crate::rule::RuleKind;
use crate::store::StoreHandle;
use crate::watcher::{ReloadScheduler, RuleWatcher};

/// The intent firewall façade.
///
/// The five enforcement entry points run on dispatcher threads with the
/// host's coarse lock already held; they do no I/O and take no further
/// locks beyond the snapshot acquire. The query entry points additionally
/// drop the caller's identity for the duration of the check so downstream
/// provider calls act as the firewall, not as the calling app.
pub struct IntentFirewall {
    host: Arc<dyn HostServices>,
    packages: Arc<dyn PackageProvider>,
    audit: Arc<dyn AuditSink>,
    loader: RuleLoader,
    store: StoreHandle,
    watcher: Mutex<Option<RuleWatcher>>,
}

impl IntentFirewall {
    /// Create the firewall: ensure the writable rules directory exists and
    /// perform the initial load (writable plus read-only directories).
    pub fn new(
        config: &FirewallConfig,
        host: Arc<dyn HostServices>,
        packages: Arc<dyn PackageProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.rules_dir).with_context(|| {
            format!(
                "failed to create rules directory: {}",
                config.rules_dir.display()
            )
        })?;
        let loader = RuleLoader::new(config);
        let store = StoreHandle::new(loader.load());
        Ok(Arc::new(Self {
            host,
            packages,
            audit,
            loader,
            store,
            watcher: Mutex::new(None),
        }))
    }

    /// Start watching the writable rules directory. Change bursts are
    /// debounced and reloads run serially on a dedicated thread.
    pub fn start_watching(self: &Arc<Self>) -> Result<()> {
        let firewall = Arc::downgrade(self);
        let scheduler = ReloadScheduler::spawn(move || {
            if let Some(firewall) = firewall.upgrade() {
                firewall.reload();
            }
        })?;
        let watcher = RuleWatcher::start(self.loader.rules_dir(), scheduler)?;
        *self.watcher.lock().expect("watcher slot poisoned") = Some(watcher);
        Ok(())
    }

    /// Rebuild the store from disk, then publish it. All I/O and parsing
    /// happen before the dispatcher lock is taken; the critical section is
    /// the single snapshot swap.
    pub fn reload(&self) {
        let fresh = self.loader.load();
        let _held = self
            .host
            .dispatcher_lock()
            .lock()
            .expect("dispatcher lock poisoned");
        self.store.publish(fresh);
    }

    // -----------------------------------------------------------------------
    // Enforcement path (dispatcher lock held by the caller)
    // -----------------------------------------------------------------------

    pub fn check_start_activity(
        &self,
        intent: &Intent,
        caller_uid: u32,
        caller_pid: u32,
        resolved_type: Option<&str>,
        resolved_uid: u32,
        user_id: u32,
    ) -> bool {
        self.check_intent(
            RuleKind::Activity,
            intent.component(),
            Some(intent),
            caller_uid,
            caller_pid,
            resolved_type,
            resolved_uid,
            false,
            user_id,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn check_service(
        &self,
        resolved_service: &ComponentName,
        intent: &Intent,
        caller_uid: u32,
        caller_pid: u32,
        resolved_type: Option<&str>,
        resolved_uid: u32,
        user_id: u32,
    ) -> bool {
        self.check_intent(
            RuleKind::Service,
            Some(resolved_service),
            Some(intent),
            caller_uid,
            caller_pid,
            resolved_type,
            resolved_uid,
            false,
            user_id,
        )
    }

    pub fn check_broadcast(
        &self,
        intent: &Intent,
        caller_uid: u32,
        caller_pid: u32,
        resolved_type: Option<&str>,
        receiving_uid: u32,
        user_id: u32,
    ) -> bool {
        self.check_intent(
            RuleKind::Broadcast,
            intent.component(),
            Some(intent),
            caller_uid,
            caller_pid,
            resolved_type,
            receiving_uid,
            false,
            user_id,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn check_provider(
        &self,
        resolved_provider: &ComponentName,
        intent: &Intent,
        caller_uid: u32,
        caller_pid: u32,
        resolved_type: Option<&str>,
        resolved_uid: u32,
        user_id: u32,
    ) -> bool {
        self.check_intent(
            RuleKind::Provider,
            Some(resolved_provider),
            Some(intent),
            caller_uid,
            caller_pid,
            resolved_type,
            resolved_uid,
            false,
            user_id,
        )
    }

    // -----------------------------------------------------------------------
    // Query path (caller identity dropped for the duration)
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn check_query_activity(
        &self,
        resolved_activity: &ComponentName,
        intent: &Intent,
        caller_uid: u32,
        caller_pid: u32,
        resolved_type: Option<&str>,
        resolved_uid: u32,
        user_id: u32,
    ) -> bool {
        let _identity = IdentityGuard::clear(&*self.host);
        self.check_intent(
            RuleKind::Activity,
            Some(resolved_activity),
            Some(intent),
            caller_uid,
            caller_pid,
            resolved_type,
            resolved_uid,
            true,
            user_id,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn check_query_service(
        &self,
        resolved_service: &ComponentName,
        intent: &Intent,
        caller_uid: u32,
        caller_pid: u32,
        resolved_type: Option<&str>,
        resolved_uid: u32,
        user_id: u32,
    ) -> bool {
        let _identity = IdentityGuard::clear(&*self.host);
        self.check_intent(
            RuleKind::Service,
            Some(resolved_service),
            Some(intent),
            caller_uid,
            caller_pid,
            resolved_type,
            resolved_uid,
            true,
            user_id,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn check_query_receiver(
        &self,
        resolved_receiver: &ComponentName,
        intent: &Intent,
        caller_uid: u32,
        caller_pid: u32,
        resolved_type: Option<&str>,
        receiving_uid: u32,
        user_id: u32,
    ) -> bool {
        let _identity = IdentityGuard::clear(&*self.host);
        self.check_intent(
            RuleKind::Broadcast,
            Some(resolved_receiver),
            Some(intent),
            caller_uid,
            caller_pid,
            resolved_type,
            receiving_uid,
            true,
            user_id,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn check_query_provider(
        &self,
        resolved_provider: &ComponentName,
        intent: &Intent,
        caller_uid: u32,
        caller_pid: u32,
        resolved_type: Option<&str>,
        resolved_uid: u32,
        user_id: u32,
    ) -> bool {
        let _identity = IdentityGuard::clear(&*self.host);
        self.check_intent(
            RuleKind::Provider,
            Some(resolved_provider),
            Some(intent),
            caller_uid,
            caller_pid,
            resolved_type,
            resolved_uid,
            true,
            user_id,
        )
    }

    /// Package visibility check: no intent semantics, just the flat rule
    /// list with query effects.
    pub fn check_query_package(
        &self,
        target_uid: u32,
        target_package: &str,
        caller_uid: u32,
        user_id: u32,
    ) -> bool {
        let _identity = IdentityGuard::clear(&*self.host);
        let snapshot = self.store.snapshot();
        let ctx = self.ctx();
        let query = PackageQuery {
            target_package,
            caller_uid,
            target_uid,
            user_id,
        };

        let mut block = false;
        let mut log = false;
        for rule in snapshot.package_rules() {
            if rule.matches_package(&ctx, &query) {
                let effects = rule.effects();
                block |= effects.block_query;
                log |= effects.log_query;
                if block && log {
                    break;
                }
            }
        }
        if log {
            self.audit
                .package_query(target_uid, target_package, caller_uid, user_id);
        }
        !block
    }

    // -----------------------------------------------------------------------
    // Core
    // -----------------------------------------------------------------------

    fn ctx(&self) -> FirewallCtx<'_> {
        FirewallCtx {
            packages: &*self.packages,
            host: &*self.host,
        }
    }

    /// Two-phase check shared by all intent entry points. Phase 1 asks the
    /// kind's resolver for candidates; phase 2 runs each rule's full match
    /// and ORs the effect bits, exiting early once both are set. Effects are
    /// drawn from the enforcement or the query set depending on the path.
    #[allow(clippy::too_many_arguments)]
    fn check_intent(
        &self,
        kind: RuleKind,
        resolved_component: Option<&ComponentName>,
        intent: Option<&Intent>,
        caller_uid: u32,
        caller_pid: u32,
        resolved_type: Option<&str>,
        receiving_uid: u32,
        for_query: bool,
        user_id: u32,
    ) -> bool {
        let snapshot = self.store.snapshot();
        let Some(resolver) = snapshot.resolver(kind) else {
            debug_assert!(false, "package checks go through check_query_package");
            return true;
        };
        let ctx = self.ctx();
        let call = CallContext {
            resolved_component,
            intent,
            caller_uid,
            caller_pid,
            resolved_type,
            receiving_uid,
            user_id,
        };

        let mut block = false;
        let mut log = false;
        for rule in resolver.candidate_rules(intent, resolved_type, resolved_component) {
            if rule.matches(&ctx, &call) {
                let effects = rule.effects();
                block |= if for_query {
                    effects.block_query
                } else {
                    effects.block
                };
                log |= if for_query {
                    effects.log_query
                } else {
                    effects.log
                };
                if block && log {
                    break;
                }
            }
        }

        if log {
            self.emit_intent_audit(kind, intent, resolved_component, caller_uid, resolved_type);
        }
        !block
    }

    fn emit_intent_audit(
        &self,
        kind: RuleKind,
        intent: Option<&Intent>,
        resolved_component: Option<&ComponentName>,
        caller_uid: u32,
        resolved_type: Option<&str>,
    ) {
        // Prefer the component the caller asked for over the resolved one.
        let component = intent
            .and_then(Intent::component)
            .or(resolved_component);
        let (caller_package_count, caller_packages) =
            match self.packages.packages_for_uid(caller_uid) {
                Ok(packages) => (packages.len(), join_packages(&packages)),
                Err(e) => {
                    tracing::error!(error = %e, caller_uid, "failed to resolve caller packages");
                    (0, None)
                }
            };
        let record = IntentAuditRecord {
            kind,
            short_component: component.map(ComponentName::flatten_short),
            caller_uid,
            caller_package_count,
            caller_packages,
            action: intent.and_then(Intent::action).map(str::to_string),
            resolved_type: resolved_type.map(str::to_string),
            data: intent
                .and_then(Intent::data)
                .map(|d| d.as_str().to_string()),
            flags: intent.map_or(0, Intent::flags),
        };
        self.audit.intent_matched(&record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{CollectingAuditSink, FakeHost, FakePackageProvider};
    use std::fs;
    use std::path::Path;

    struct Harness {
        firewall: Arc<IntentFirewall>,
        host: Arc<FakeHost>,
        audit: Arc<CollectingAuditSink>,
        _dir: tempfile::TempDir,
    }

    fn harness_with(rules: &str, host: FakeHost, packages: FakePackageProvider) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rules.xml"), rules).unwrap();
        let config = FirewallConfig {
            rules_dir: dir.path().to_path_buf(),
            system_rules_dirs: Vec::new(),
            log_level: "info".to_string(),
        };
        let host = Arc::new(host);
        let audit = Arc::new(CollectingAuditSink::new());
        let firewall = IntentFirewall::new(
            &config,
            host.clone(),
            Arc::new(packages),
            audit.clone(),
        )
        .unwrap();
        Harness {
            firewall,
            host,
            audit,
            _dir: dir,
        }
    }

    fn harness(rules: &str) -> Harness {
        harness_with(rules, FakeHost::new(), FakePackageProvider::new())
    }

    fn rewrite_rules(harness: &Harness, rules: &str) {
        fs::write(harness._dir.path().join("rules.xml"), rules).unwrap();
    }

    fn component(flat: &str) -> ComponentName {
        ComponentName::unflatten(flat).unwrap()
    }

    #[test]
    fn action_based_block() {
        let h = harness(
            r#"<rules>
                 <activity block="true">
                   <intent-filter><action name="a.b.C"/></intent-filter>
                 </activity>
               </rules>"#,
        );
        let blocked = Intent::new()
            .with_action("a.b.C")
            .with_component(component("com.any/.Cls"));
        let other = Intent::new().with_action("a.b.D");
        assert!(!h.firewall.check_start_activity(&blocked, 10001, 1, None, 10002, 0));
        assert!(h.firewall.check_start_activity(&other, 10001, 1, None, 10002, 0));
    }

    #[test]
    fn package_scoping() {
        let h = harness(
            r#"<rules>
                 <activity block="true" pkgName="com.x">
                   <intent-filter><action name="a.b.C"/></intent-filter>
                 </activity>
               </rules>"#,
        );
        let to_y = Intent::new()
            .with_action("a.b.C")
            .with_component(component("com.y/.Z"));
        let to_x = Intent::new()
            .with_action("a.b.C")
            .with_component(component("com.x/.Z"));
        assert!(h.firewall.check_start_activity(&to_y, 10001, 1, None, 10002, 0));
        assert!(!h.firewall.check_start_activity(&to_x, 10001, 1, None, 10002, 0));
    }

    #[test]
    fn match_all_is_scoped_to_its_kind() {
        let h = harness(r#"<rules><broadcast block="true" matchall="true"/></rules>"#);
        let intent = Intent::new().with_action("anything.at.ALL");
        assert!(!h.firewall.check_broadcast(&intent, 10001, 1, None, 10002, 0));
        assert!(h.firewall.check_start_activity(&intent, 10001, 1, None, 10002, 0));
    }

    #[test]
    fn or_of_sender_permissions() {
        let rules = r#"<rules>
             <broadcast block="true">
               <component-filter name="com.t/.Recv"/>
               <or>
                 <sender-permission name="P1"/>
                 <sender-permission name="P2"/>
               </or>
             </broadcast>
           </rules>"#;

        let holder = harness_with(
            rules,
            FakeHost::new().with_component_permission("P1"),
            FakePackageProvider::new(),
        );
        let no_holder = harness(rules);

        let intent = Intent::new().with_component(component("com.t/.Recv"));
        assert!(!holder.firewall.check_broadcast(&intent, 10001, 1, None, 10002, 0));
        assert!(no_holder.firewall.check_broadcast(&intent, 10001, 1, None, 10002, 0));
    }

    #[test]
    fn query_vs_enforce_asymmetry() {
        let h = harness(
            r#"<rules>
                 <service block="false" blockquery="true">
                   <component-filter name="com.t/.Svc"/>
                 </service>
               </rules>"#,
        );
        let target = component("com.t/.Svc");
        let intent = Intent::new();
        assert!(h
            .firewall
            .check_service(&target, &intent, 10001, 1, None, 10002, 0));
        assert!(!h
            .firewall
            .check_query_service(&target, &intent, 10001, 1, None, 10002, 0));
    }

    #[test]
    fn in_flight_snapshot_survives_reload() {
        let h = harness(r#"<rules></rules>"#);
        let intent = Intent::new().with_action("a.b.C");

        // A dispatch "in flight": it grabbed its snapshot before publish.
        let old_snapshot = h.firewall.store.snapshot();

        rewrite_rules(
            &h,
            r#"<rules><activity block="true" matchall="true"/></rules>"#,
        );
        h.firewall.reload();

        // The old snapshot still answers with the old rules...
        let resolver = old_snapshot.resolver(RuleKind::Activity).unwrap();
        assert!(resolver.candidate_rules(Some(&intent), None, None).is_empty());

        // ...and the next dispatch sees the new generation.
        assert!(!h.firewall.check_start_activity(&intent, 10001, 1, None, 10002, 0));
    }

    #[test]
    fn reload_swaps_all_kinds_atomically() {
        let h = harness(
            r#"<rules>
                 <activity block="true" matchall="true"/>
                 <service block="true" matchall="true"/>
               </rules>"#,
        );
        let before = h.firewall.store.snapshot().counts();
        assert_eq!((before.activity, before.service), (1, 1));

        rewrite_rules(
            &h,
            r#"<rules><broadcast block="true" matchall="true"/></rules>"#,
        );
        h.firewall.reload();

        let after = h.firewall.store.snapshot().counts();
        assert_eq!((after.activity, after.service, after.broadcast), (0, 0, 1));
    }

    #[test]
    fn malformed_rule_does_not_disturb_the_valid_one() {
        let h = harness(
            r#"<rules>
                 <activity block="true">
                   <not><sender type="system"/><sender type="user"/></not>
                 </activity>
                 <activity block="true">
                   <intent-filter><action name="a.GOOD"/></intent-filter>
                 </activity>
               </rules>"#,
        );
        let good = Intent::new().with_action("a.GOOD");
        let unrelated = Intent::new().with_action("a.OTHER");
        assert!(!h.firewall.check_start_activity(&good, 10001, 1, None, 10002, 0));
        assert!(h.firewall.check_start_activity(&unrelated, 10001, 1, None, 10002, 0));
    }

    #[test]
    fn audit_emitted_on_logged_block() {
        let h = harness_with(
            r#"<rules>
                 <activity block="true" log="true">
                   <intent-filter><action name="a.b.C"/></intent-filter>
                 </activity>
               </rules>"#,
            FakeHost::new(),
            FakePackageProvider::new().with_uid_packages(10001, &["com.caller.one", "com.caller.two"]),
        );
        let intent = Intent::new()
            .with_action("a.b.C")
            .with_component(component("com.t/.Cls"))
            .with_data("https://example.com/x")
            .with_flags(0x400);
        assert!(!h.firewall.check_start_activity(&intent, 10001, 7, Some("text/plain"), 10002, 0));

        assert_eq!(h.audit.intent_count(), 1);
        let records = h.audit.intents.lock().unwrap();
        let record = &records[0];
        assert_eq!(record.kind, RuleKind::Activity);
        assert_eq!(record.short_component.as_deref(), Some("com.t/.Cls"));
        assert_eq!(record.caller_uid, 10001);
        assert_eq!(record.caller_package_count, 2);
        assert_eq!(
            record.caller_packages.as_deref(),
            Some("com.caller.one,com.caller.two")
        );
        assert_eq!(record.action.as_deref(), Some("a.b.C"));
        assert_eq!(record.resolved_type.as_deref(), Some("text/plain"));
        assert_eq!(record.data.as_deref(), Some("https://example.com/x"));
        assert_eq!(record.flags, 0x400);
    }

    #[test]
    fn no_audit_without_log_effect() {
        let h = harness(
            r#"<rules>
                 <activity block="true">
                   <intent-filter><action name="a.b.C"/></intent-filter>
                 </activity>
               </rules>"#,
        );
        let intent = Intent::new().with_action("a.b.C");
        assert!(!h.firewall.check_start_activity(&intent, 10001, 1, None, 10002, 0));
        assert_eq!(h.audit.intent_count(), 0);
    }

    #[test]
    fn log_only_rule_allows_but_audits() {
        let h = harness(
            r#"<rules>
                 <broadcast log="true">
                   <intent-filter><action name="a.SEEN"/></intent-filter>
                 </broadcast>
               </rules>"#,
        );
        let intent = Intent::new().with_action("a.SEEN");
        assert!(h.firewall.check_broadcast(&intent, 10001, 1, None, 10002, 0));
        assert_eq!(h.audit.intent_count(), 1);
    }

    #[test]
    fn effects_accumulate_across_rules() {
        // One rule blocks, a different one logs; both must contribute.
        let h = harness(
            r#"<rules>
                 <activity block="true">
                   <intent-filter><action name="a.b.C"/></intent-filter>
                 </activity>
                 <activity log="true">
                   <intent-filter><action name="a.b.C"/></intent-filter>
                 </activity>
               </rules>"#,
        );
        let intent = Intent::new().with_action("a.b.C");
        assert!(!h.firewall.check_start_activity(&intent, 10001, 1, None, 10002, 0));
        assert_eq!(h.audit.intent_count(), 1);
    }

    #[test]
    fn package_query_blocks_and_logs() {
        let h = harness(
            r#"<rules>
                 <package pkgName="com.hidden" blockquery="true" logquery="true"/>
               </rules>"#,
        );
        assert!(!h.firewall.check_query_package(10002, "com.hidden", 10001, 0));
        assert!(h.firewall.check_query_package(10003, "com.visible", 10001, 0));
        assert_eq!(h.audit.package_query_count(), 1);
        let queries = h.audit.package_queries.lock().unwrap();
        assert_eq!(queries[0], (10002, "com.hidden".to_string(), 10001, 0));
    }

    #[test]
    fn package_rules_do_not_leak_into_enforcement() {
        let h = harness(
            r#"<rules>
                 <package pkgName="com.hidden" block="true" blockquery="true"/>
               </rules>"#,
        );
        // Enforcement of an activity toward the same package is untouched.
        let intent = Intent::new().with_component(component("com.hidden/.Main"));
        assert!(h.firewall.check_start_activity(&intent, 10001, 1, None, 10002, 0));
    }

    #[test]
    fn query_paths_restore_identity() {
        let h = harness(
            r#"<rules>
                 <service blockquery="true"><component-filter name="com.t/.Svc"/></service>
               </rules>"#,
        );
        let target = component("com.t/.Svc");
        let intent = Intent::new();

        h.firewall
            .check_query_service(&target, &intent, 10001, 1, None, 10002, 0);
        h.firewall
            .check_query_activity(&target, &intent, 10001, 1, None, 10002, 0);
        h.firewall
            .check_query_receiver(&target, &intent, 10001, 1, None, 10002, 0);
        h.firewall
            .check_query_provider(&target, &intent, 10001, 1, None, 10002, 0);
        h.firewall.check_query_package(10002, "com.t", 10001, 0);

        assert_eq!(h.host.cleared(), 5);
        assert_eq!(h.host.restored(), 5);
    }

    #[test]
    fn enforcement_paths_leave_identity_alone() {
        let h = harness(r#"<rules></rules>"#);
        let intent = Intent::new().with_action("a");
        h.firewall.check_start_activity(&intent, 10001, 1, None, 10002, 0);
        h.firewall.check_broadcast(&intent, 10001, 1, None, 10002, 0);
        assert_eq!(h.host.cleared(), 0);
    }

    #[test]
    fn creates_missing_rules_directory() {
        let dir = tempfile::tempdir().unwrap();
        let rules_dir = dir.path().join("nested").join("ifw");
        let config = FirewallConfig {
            rules_dir: rules_dir.clone(),
            system_rules_dirs: Vec::new(),
            log_level: "info".to_string(),
        };
        let firewall = IntentFirewall::new(
            &config,
            Arc::new(FakeHost::new()),
            Arc::new(FakePackageProvider::new()),
            Arc::new(CollectingAuditSink::new()),
        )
        .unwrap();
        assert!(rules_dir.is_dir());
        let intent = Intent::new().with_action("a");
        assert!(firewall.check_start_activity(&intent, 10001, 1, None, 10002, 0));
    }

    #[test]
    fn watcher_applies_new_rules_after_write() {
        let h = harness(r#"<rules></rules>"#);
        h.firewall.start_watching().unwrap();

        let intent = Intent::new().with_action("a.b.C");
        assert!(h.firewall.check_start_activity(&intent, 10001, 1, None, 10002, 0));

        fs::write(
            h._dir.path().join("extra.xml"),
            r#"<rules>
                 <activity block="true">
                   <intent-filter><action name="a.b.C"/></intent-filter>
                 </activity>
               </rules>"#,
        )
        .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut denied = false;
        while std::time::Instant::now() < deadline {
            if !h.firewall.check_start_activity(&intent, 10001, 1, None, 10002, 0) {
                denied = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert!(denied, "watcher never applied the new rule file");
    }

    #[test]
    fn system_dir_rules_participate() {
        let writable = tempfile::tempdir().unwrap();
        let system = tempfile::tempdir().unwrap();
        fs::write(
            system.path().join("base.xml"),
            r#"<rules><broadcast block="true" matchall="true"/></rules>"#,
        )
        .unwrap();
        let config = FirewallConfig {
            rules_dir: writable.path().to_path_buf(),
            system_rules_dirs: vec![system.path().to_path_buf()],
            log_level: "info".to_string(),
        };
        let firewall = IntentFirewall::new(
            &config,
            Arc::new(FakeHost::new()),
            Arc::new(FakePackageProvider::new()),
            Arc::new(CollectingAuditSink::new()),
        )
        .unwrap();
        let intent = Intent::new().with_action("x");
        assert!(!firewall.check_broadcast(&intent, 10001, 1, None, 10002, 0));
    }

    #[test]
    fn rule_addition_is_monotone_for_blocking() {
        // check(R ∪ {r}) = check(R) ∨ r's own verdict.
        let base = r#"<rules>
             <activity block="true">
               <intent-filter><action name="a.ONE"/></intent-filter>
             </activity>
           </rules>"#;
        let extended = r#"<rules>
             <activity block="true">
               <intent-filter><action name="a.ONE"/></intent-filter>
             </activity>
             <activity block="true">
               <intent-filter><action name="a.TWO"/></intent-filter>
             </activity>
           </rules>"#;
        let h_base = harness(base);
        let h_ext = harness(extended);

        for action in ["a.ONE", "a.TWO", "a.THREE"] {
            let intent = Intent::new().with_action(action);
            let base_allows = h_base
                .firewall
                .check_start_activity(&intent, 10001, 1, None, 10002, 0);
            let ext_allows = h_ext
                .firewall
                .check_start_activity(&intent, 10001, 1, None, 10002, 0);
            let added_blocks = action == "a.TWO";
            assert_eq!(!ext_allows, !base_allows || added_blocks, "action {action}");
        }
    }

    #[test]
    fn unreadable_rules_directory_is_not_fatal() {
        // Loading with a rules dir that exists but contains no xml.
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.txt"), "no rules here").unwrap();
        let config = FirewallConfig {
            rules_dir: dir.path().to_path_buf(),
            system_rules_dirs: vec![Path::new("/definitely/not/here").to_path_buf()],
            log_level: "info".to_string(),
        };
        let firewall = IntentFirewall::new(
            &config,
            Arc::new(FakeHost::new()),
            Arc::new(FakePackageProvider::new()),
            Arc::new(CollectingAuditSink::new()),
        )
        .unwrap();
        let intent = Intent::new().with_action("a");
        assert!(firewall.check_start_activity(&intent, 10001, 1, None, 10002, 0));
    }
}
