//! Fake collaborators shared by the test modules.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::audit::{AuditSink, IntentAuditRecord};
use crate::provider::{
    FirewallCtx, HostServices, IdentityToken, PackageProvider, ProviderError,
};

pub fn ctx<'a>(packages: &'a dyn PackageProvider, host: &'a dyn HostServices) -> FirewallCtx<'a> {
    FirewallCtx { packages, host }
}

// ---------------------------------------------------------------------------
// FakePackageProvider
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakePackageProvider {
    packages_by_uid: HashMap<u32, Vec<String>>,
    platform_signed: HashSet<u32>,
    permissions: HashSet<(u32, String)>,
    failing: bool,
}

impl FakePackageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call answers with a provider error.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn with_uid_packages(mut self, uid: u32, packages: &[&str]) -> Self {
        self.packages_by_uid
            .insert(uid, packages.iter().map(|p| p.to_string()).collect());
        self
    }

    pub fn with_platform_signed(mut self, uid: u32) -> Self {
        self.platform_signed.insert(uid);
        self
    }

    pub fn with_uid_permission(mut self, uid: u32, permission: &str) -> Self {
        self.permissions.insert((uid, permission.to_string()));
        self
    }

    fn check_available(&self) -> Result<(), ProviderError> {
        if self.failing {
            Err(ProviderError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl PackageProvider for FakePackageProvider {
    fn packages_for_uid(&self, uid: u32) -> Result<Vec<String>, ProviderError> {
        self.check_available()?;
        Ok(self.packages_by_uid.get(&uid).cloned().unwrap_or_default())
    }

    fn uid_signatures_match(&self, uid_a: u32, uid_b: u32) -> Result<bool, ProviderError> {
        self.check_available()?;
        let platform = |uid: u32| uid == crate::provider::SYSTEM_UID || self.platform_signed.contains(&uid);
        Ok(platform(uid_a) && platform(uid_b))
    }

    fn uid_has_permission(&self, permission: &str, uid: u32) -> Result<bool, ProviderError> {
        self.check_available()?;
        Ok(self.permissions.contains(&(uid, permission.to_string())))
    }
}

// ---------------------------------------------------------------------------
// FakeHost
// ---------------------------------------------------------------------------

pub struct FakeHost {
    lock: Mutex<()>,
    component_permissions: HashSet<String>,
    provisioned: bool,
    cleared: AtomicU64,
    restored: AtomicU64,
    next_token: AtomicU64,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            component_permissions: HashSet::new(),
            provisioned: false,
            cleared: AtomicU64::new(0),
            restored: AtomicU64::new(0),
            next_token: AtomicU64::new(1),
        }
    }

    /// Grant the named permission to every caller.
    pub fn with_component_permission(mut self, permission: &str) -> Self {
        self.component_permissions.insert(permission.to_string());
        self
    }

    pub fn with_provisioned(mut self, provisioned: bool) -> Self {
        self.provisioned = provisioned;
        self
    }

    pub fn cleared(&self) -> u64 {
        self.cleared.load(Ordering::SeqCst)
    }

    pub fn restored(&self) -> u64 {
        self.restored.load(Ordering::SeqCst)
    }
}

impl HostServices for FakeHost {
    fn check_component_permission(
        &self,
        permission: &str,
        _pid: u32,
        _uid: u32,
        _owning_uid: u32,
        _exported: bool,
    ) -> Result<bool, ProviderError> {
        Ok(self.component_permissions.contains(permission))
    }

    fn dispatcher_lock(&self) -> &Mutex<()> {
        &self.lock
    }

    fn device_provisioned(&self) -> Result<bool, ProviderError> {
        Ok(self.provisioned)
    }

    fn clear_calling_identity(&self) -> IdentityToken {
        self.cleared.fetch_add(1, Ordering::SeqCst);
        IdentityToken(self.next_token.fetch_add(1, Ordering::SeqCst))
    }

    fn restore_calling_identity(&self, _token: IdentityToken) {
        self.restored.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// CollectingAuditSink
// ---------------------------------------------------------------------------

/// Captures emitted audit events for assertions.
#[derive(Default)]
pub struct CollectingAuditSink {
    pub intents: Mutex<Vec<IntentAuditRecord>>,
    pub package_queries: Mutex<Vec<(u32, String, u32, u32)>>,
}

impl CollectingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intent_count(&self) -> usize {
        self.intents.lock().unwrap().len()
    }

    pub fn package_query_count(&self) -> usize {
        self.package_queries.lock().unwrap().len()
    }
}

impl AuditSink for CollectingAuditSink {
    fn intent_matched(&self, record: &IntentAuditRecord) {
        self.intents.lock().unwrap().push(record.clone());
    }

    fn package_query(&self, target_uid: u32, target_package: &str, caller_uid: u32, user_id: u32) {
        self.package_queries.lock().unwrap().push((
            target_uid,
            target_package.to_string(),
            caller_uid,
            user_id,
        ));
    }
}
