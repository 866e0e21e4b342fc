use std::sync::Mutex;

use thiserror::Error;

/// Root uid.
pub const ROOT_UID: u32 = 0;
/// Uid of the core platform packages; the reference point for `signature`
/// sender classification.
pub const SYSTEM_UID: u32 = 1000;
/// Uids below this belong to the system, not to installed applications.
pub const FIRST_APPLICATION_UID: u32 = 10000;

/// Failure of an injected collaborator. Predicates that hit one of these
/// evaluate to false; the dispatch itself keeps going.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unavailable")]
    Unavailable,
    #[error("remote call failed: {0}")]
    Remote(String),
}

/// Package, signature, and permission queries, answered by the host's
/// package service.
pub trait PackageProvider: Send + Sync {
    /// All package names installed under the uid. A uid may back several
    /// packages (shared-uid groups).
    fn packages_for_uid(&self, uid: u32) -> Result<Vec<String>, ProviderError>;

    /// Whether two uids are signed with matching certificates, across users.
    fn uid_signatures_match(&self, uid_a: u32, uid_b: u32) -> Result<bool, ProviderError>;

    /// Whether the uid holds the named permission.
    fn uid_has_permission(&self, permission: &str, uid: u32) -> Result<bool, ProviderError>;
}

/// The slice of the host dispatch service the firewall consumes: the
/// component-permission check, the coarse dispatcher lock (publication
/// happens under it), the provisioning flag, and calling-identity scoping
/// for the query paths.
pub trait HostServices: Send + Sync {
    fn check_component_permission(
        &self,
        permission: &str,
        pid: u32,
        uid: u32,
        owning_uid: u32,
        exported: bool,
    ) -> Result<bool, ProviderError>;

    /// The dispatcher's coarse lock. Dispatch entry points are invoked with
    /// it already held; the reload path takes it only for the store swap.
    fn dispatcher_lock(&self) -> &Mutex<()>;

    fn device_provisioned(&self) -> Result<bool, ProviderError>;

    /// Swap the current caller identity for the firewall's own, returning a
    /// token for restoration.
    fn clear_calling_identity(&self) -> IdentityToken;

    fn restore_calling_identity(&self, token: IdentityToken);
}

/// Opaque saved-identity token handed back on restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityToken(pub u64);

/// Scoped identity drop: restores the saved identity when dropped, on both
/// normal and unwinding exits.
pub struct IdentityGuard<'a> {
    host: &'a dyn HostServices,
    token: Option<IdentityToken>,
}

impl<'a> IdentityGuard<'a> {
    pub fn clear(host: &'a dyn HostServices) -> Self {
        let token = host.clear_calling_identity();
        Self {
            host,
            token: Some(token),
        }
    }
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.host.restore_calling_identity(token);
        }
    }
}

/// Evaluation context threaded through predicate matching.
///
/// Wraps the raw collaborators with the fail-open policy: a provider error
/// is logged and the query answers false, so the predicate does not match
/// and other rules still get their say.
#[derive(Clone, Copy)]
pub struct FirewallCtx<'a> {
    pub packages: &'a dyn PackageProvider,
    pub host: &'a dyn HostServices,
}

impl FirewallCtx<'_> {
    pub fn check_component_permission(
        &self,
        permission: &str,
        pid: u32,
        uid: u32,
        owning_uid: u32,
        exported: bool,
    ) -> bool {
        self.host
            .check_component_permission(permission, pid, uid, owning_uid, exported)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, permission, uid, "component permission check failed");
                false
            })
    }

    pub fn signatures_match(&self, uid_a: u32, uid_b: u32) -> bool {
        self.packages
            .uid_signatures_match(uid_a, uid_b)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, uid_a, uid_b, "signature comparison failed");
                false
            })
    }

    pub fn uid_has_permission(&self, permission: &str, uid: u32) -> bool {
        self.packages
            .uid_has_permission(permission, uid)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, permission, uid, "uid permission query failed");
                false
            })
    }

    pub fn uid_holds_package(&self, uid: u32, package: &str) -> bool {
        match self.packages.packages_for_uid(uid) {
            Ok(packages) => packages.iter().any(|p| p == package),
            Err(e) => {
                tracing::warn!(error = %e, uid, "package lookup failed");
                false
            }
        }
    }

    pub fn device_provisioned(&self) -> bool {
        self.host.device_provisioned().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "provisioned state read failed");
            false
        })
    }
}
