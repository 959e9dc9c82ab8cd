//! Multi-tenant channel registry and ACL.
//!
//! The registry owns every [`Channel`] plus a per-user subscription index.
//! It is sharded internally (`DashMap`) so concurrent lookups from many
//! connection tasks never contend on one global lock. Connection managers
//! hold only channel full names — never channel or connection ownership.

use std::collections::HashSet;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::channel::{Channel, ChannelKind};

/// Registry operation error. All registry operations are pure and local;
/// the only failures are invalid input and conflicting re-creation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// An empty organization id was supplied.
    #[error("organization id must not be empty")]
    InvalidOrganization,

    /// An empty user id was supplied where one is required.
    #[error("user id must not be empty")]
    InvalidUser,

    /// A channel was re-created with a different role set.
    #[error("channel {full_name} already exists with different required roles")]
    RoleConflict {
        /// Full name of the conflicting channel.
        full_name: String,
    },
}

/// Accepted/denied partition of a batch subscribe request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionOutcome {
    /// Channels the caller was subscribed to.
    pub subscribed: Vec<String>,
    /// Channels the caller was denied access to.
    pub denied: Vec<String>,
}

/// Read-only registry snapshot for one organization.
#[derive(Clone, Debug, Serialize)]
pub struct OrganizationStats {
    /// Number of channels owned by the organization.
    pub total_channels: usize,
    /// Full names of those channels, sorted.
    pub channel_names: Vec<String>,
}

/// The standard channel set bootstrapped for a new tenant.
const DEFAULT_CHANNELS: [(&str, ChannelKind, &[&str]); 5] = [
    ("general", ChannelKind::Organization, &[]),
    ("metrics", ChannelKind::Metric, &[]),
    ("alerts", ChannelKind::Alert, &[]),
    ("admin", ChannelKind::Admin, &["admin"]),
    ("logs", ChannelKind::Log, &["admin", "operator"]),
];

/// Owns the mapping from logical channel names to full names and answers
/// every access-control query.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    /// full_name -> channel
    channels: DashMap<String, Channel>,
    /// organization_id -> full names owned by it
    by_org: DashMap<String, HashSet<String>>,
    /// (organization_id, user_id) -> subscribed full names
    subscriptions: DashMap<(String, String), HashSet<String>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a channel, idempotently.
    ///
    /// Re-creating with identical parameters returns the existing channel.
    /// Re-creating with a different `required_roles` set is a logic error:
    /// the existing roles are never silently widened or narrowed.
    pub fn create_channel(
        &self,
        name: &str,
        kind: ChannelKind,
        organization_id: &str,
        user_id: Option<String>,
        required_roles: HashSet<String>,
    ) -> Result<Channel, RegistryError> {
        if organization_id.is_empty() {
            return Err(RegistryError::InvalidOrganization);
        }

        let candidate = Channel::new(name, kind, organization_id, user_id, required_roles);
        let full_name = candidate.full_name();

        match self.channels.entry(full_name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                if existing.get().required_roles() != candidate.required_roles() {
                    return Err(RegistryError::RoleConflict { full_name });
                }
                Ok(existing.get().clone())
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let _ = slot.insert(candidate.clone());
                let _ = self
                    .by_org
                    .entry(organization_id.to_owned())
                    .or_default()
                    .insert(full_name.clone());
                debug!(channel = %full_name, "channel created");
                Ok(candidate)
            }
        }
    }

    /// Look up a channel by full name.
    #[must_use]
    pub fn channel(&self, full_name: &str) -> Option<Channel> {
        self.channels.get(full_name).map(|c| c.clone())
    }

    /// Whether the caller may read/write the channel.
    ///
    /// Cross-tenant access is always denied regardless of roles. Role-gated
    /// channels require an intersecting role set. User-private channels
    /// require a matching user id. Unknown channels are denied.
    #[must_use]
    pub fn can_access_channel(
        &self,
        full_name: &str,
        organization_id: &str,
        user_id: Option<&str>,
        roles: Option<&HashSet<String>>,
    ) -> bool {
        let Some(channel) = self.channels.get(full_name) else {
            return false;
        };

        if channel.organization_id() != organization_id {
            return false;
        }

        if !channel.required_roles().is_empty() {
            let intersects = roles
                .is_some_and(|r| !r.is_disjoint(channel.required_roles()));
            if !intersects {
                return false;
            }
        }

        if channel.kind() == ChannelKind::User && channel.user_id() != user_id {
            return false;
        }

        true
    }

    /// Partition a batch subscribe request into accepted and denied
    /// channels, recording accepted subscriptions.
    ///
    /// Never fails on ACL grounds — callers must inspect `denied`.
    pub fn subscribe_user(
        &self,
        organization_id: &str,
        user_id: &str,
        roles: Option<&HashSet<String>>,
        channel_full_names: &[String],
    ) -> Result<SubscriptionOutcome, RegistryError> {
        if organization_id.is_empty() {
            return Err(RegistryError::InvalidOrganization);
        }
        if user_id.is_empty() {
            return Err(RegistryError::InvalidUser);
        }

        let mut outcome = SubscriptionOutcome::default();
        for name in channel_full_names {
            if self.can_access_channel(name, organization_id, Some(user_id), roles) {
                outcome.subscribed.push(name.clone());
            } else {
                outcome.denied.push(name.clone());
            }
        }

        if !outcome.subscribed.is_empty() {
            let key = (organization_id.to_owned(), user_id.to_owned());
            let mut entry = self.subscriptions.entry(key).or_default();
            for name in &outcome.subscribed {
                let _ = entry.insert(name.clone());
            }
        }

        Ok(outcome)
    }

    /// Remove subscriptions; returns the channels actually removed.
    pub fn unsubscribe_user(
        &self,
        organization_id: &str,
        user_id: &str,
        channel_full_names: &[String],
    ) -> Vec<String> {
        let key = (organization_id.to_owned(), user_id.to_owned());
        let Some(mut entry) = self.subscriptions.get_mut(&key) else {
            return Vec::new();
        };
        channel_full_names
            .iter()
            .filter(|name| entry.remove(name.as_str()))
            .cloned()
            .collect()
    }

    /// The channels a user is currently subscribed to, sorted.
    #[must_use]
    pub fn get_user_subscriptions(&self, organization_id: &str, user_id: &str) -> Vec<String> {
        let key = (organization_id.to_owned(), user_id.to_owned());
        let mut names: Vec<String> = self
            .subscriptions
            .get(&key)
            .map(|entry| entry.iter().cloned().collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Bootstrap the standard channel set for a newly onboarded tenant.
    /// Idempotent.
    pub fn create_default_channels(
        &self,
        organization_id: &str,
    ) -> Result<Vec<Channel>, RegistryError> {
        DEFAULT_CHANNELS
            .iter()
            .map(|(name, kind, roles)| {
                self.create_channel(
                    name,
                    *kind,
                    organization_id,
                    None,
                    roles.iter().map(|r| (*r).to_owned()).collect(),
                )
            })
            .collect()
    }

    /// Registry snapshot for one organization.
    #[must_use]
    pub fn get_organization_stats(&self, organization_id: &str) -> OrganizationStats {
        let mut channel_names: Vec<String> = self
            .by_org
            .get(organization_id)
            .map(|entry| entry.iter().cloned().collect())
            .unwrap_or_default();
        channel_names.sort_unstable();
        OrganizationStats {
            total_channels: channel_names.len(),
            channel_names,
        }
    }

    /// Ensure a channel exists for a structurally valid full name,
    /// creating it lazily — the first publisher creates the channel.
    ///
    /// Full names are `kind:org:name`, or `user:org:user_id:name` for
    /// private channels. Returns `None` when the name does not parse.
    pub fn ensure_from_full_name(&self, full_name: &str) -> Option<Channel> {
        let mut segments = full_name.splitn(2, ':');
        let kind = ChannelKind::from_prefix(segments.next()?)?;
        let rest = segments.next()?;

        let (organization_id, user_id, name) = if kind == ChannelKind::User {
            let mut parts = rest.splitn(3, ':');
            let org = parts.next()?;
            let user = parts.next()?;
            let name = parts.next()?;
            (org, Some(user.to_owned()), name)
        } else {
            let mut parts = rest.splitn(2, ':');
            (parts.next()?, None, parts.next()?)
        };
        if organization_id.is_empty() || name.is_empty() {
            return None;
        }

        self.create_channel(name, kind, organization_id, user_id, HashSet::new())
            .ok()
    }

    /// Resolve one requested subscription name to an authorized channel
    /// full name, or `None` if access is denied.
    ///
    /// Full names (containing `:`) are checked against the ACL as-is.
    /// Short names lazily create an organization-scoped channel of that
    /// name — the first subscriber creates the channel.
    pub fn authorize_subscription(
        &self,
        requested: &str,
        organization_id: &str,
        user_id: Option<&str>,
        roles: Option<&HashSet<String>>,
    ) -> Option<String> {
        if requested.contains(':') {
            return self
                .can_access_channel(requested, organization_id, user_id, roles)
                .then(|| requested.to_owned());
        }

        let channel = self
            .create_channel(
                requested,
                ChannelKind::Organization,
                organization_id,
                None,
                HashSet::new(),
            )
            .ok()?;
        Some(channel.full_name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| (*n).to_owned()).collect()
    }

    #[test]
    fn create_channel_builds_full_name() {
        let registry = ChannelRegistry::new();
        let channel = registry
            .create_channel("metrics", ChannelKind::Metric, "org-1", None, HashSet::new())
            .unwrap();
        assert_eq!(channel.full_name(), "metric:org-1:metrics");
    }

    #[test]
    fn create_channel_is_idempotent() {
        let registry = ChannelRegistry::new();
        let first = registry
            .create_channel("metrics", ChannelKind::Metric, "org-1", None, HashSet::new())
            .unwrap();
        let second = registry
            .create_channel("metrics", ChannelKind::Metric, "org-1", None, HashSet::new())
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.get_organization_stats("org-1").total_channels, 1);
    }

    #[test]
    fn create_channel_rejects_role_conflict() {
        let registry = ChannelRegistry::new();
        let _ = registry
            .create_channel("admin", ChannelKind::Admin, "org-1", None, roles(&["admin"]))
            .unwrap();
        let err = registry
            .create_channel("admin", ChannelKind::Admin, "org-1", None, HashSet::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::RoleConflict { .. }));
        // Original roles are untouched
        let channel = registry.channel("admin:org-1:admin").unwrap();
        assert_eq!(channel.required_roles(), &roles(&["admin"]));
    }

    #[test]
    fn create_channel_rejects_empty_org() {
        let registry = ChannelRegistry::new();
        let err = registry
            .create_channel("metrics", ChannelKind::Metric, "", None, HashSet::new())
            .unwrap_err();
        assert_eq!(err, RegistryError::InvalidOrganization);
    }

    #[test]
    fn cross_tenant_access_always_denied() {
        let registry = ChannelRegistry::new();
        let channel = registry
            .create_channel("metrics", ChannelKind::Metric, "org-1", None, HashSet::new())
            .unwrap();
        // Same org passes
        assert!(registry.can_access_channel(&channel.full_name(), "org-1", Some("u1"), None));
        // Different org fails even with every role under the sun
        let all_roles = roles(&["admin", "operator", "superuser"]);
        assert!(!registry.can_access_channel(
            &channel.full_name(),
            "org-2",
            Some("u2"),
            Some(&all_roles)
        ));
    }

    #[test]
    fn role_gated_channel_requires_intersection() {
        let registry = ChannelRegistry::new();
        let channel = registry
            .create_channel("admin", ChannelKind::Admin, "org-1", None, roles(&["admin"]))
            .unwrap();
        let full = channel.full_name();

        assert!(!registry.can_access_channel(&full, "org-1", Some("u1"), None));
        assert!(!registry.can_access_channel(&full, "org-1", Some("u1"), Some(&roles(&["user"]))));
        assert!(registry.can_access_channel(&full, "org-1", Some("u1"), Some(&roles(&["admin"]))));
        assert!(registry.can_access_channel(
            &full,
            "org-1",
            Some("u1"),
            Some(&roles(&["user", "admin"]))
        ));
    }

    #[test]
    fn user_private_channel_requires_matching_user() {
        let registry = ChannelRegistry::new();
        let channel = registry
            .create_channel(
                "inbox",
                ChannelKind::User,
                "org-1",
                Some("user-1".into()),
                HashSet::new(),
            )
            .unwrap();
        let full = channel.full_name();

        assert!(registry.can_access_channel(&full, "org-1", Some("user-1"), None));
        assert!(!registry.can_access_channel(&full, "org-1", Some("user-2"), None));
        assert!(!registry.can_access_channel(&full, "org-1", None, None));
    }

    #[test]
    fn unknown_channel_is_denied() {
        let registry = ChannelRegistry::new();
        assert!(!registry.can_access_channel("metric:org-1:nope", "org-1", Some("u1"), None));
    }

    #[test]
    fn subscribe_user_partitions_without_raising() {
        let registry = ChannelRegistry::new();
        let general = registry
            .create_channel("general", ChannelKind::Organization, "org-1", None, HashSet::new())
            .unwrap();
        let admin = registry
            .create_channel("admin", ChannelKind::Admin, "org-1", None, roles(&["admin"]))
            .unwrap();

        let requested = vec![general.full_name(), admin.full_name(), "bogus:x:y".into()];
        let outcome = registry
            .subscribe_user("org-1", "user-1", None, &requested)
            .unwrap();

        assert_eq!(
            outcome.subscribed.len() + outcome.denied.len(),
            requested.len()
        );
        assert_eq!(outcome.subscribed, vec![general.full_name()]);
        assert_eq!(outcome.denied.len(), 2);
    }

    #[test]
    fn subscribe_user_with_roles_passes_gate() {
        let registry = ChannelRegistry::new();
        let admin = registry
            .create_channel("admin", ChannelKind::Admin, "org-1", None, roles(&["admin"]))
            .unwrap();
        let outcome = registry
            .subscribe_user(
                "org-1",
                "user-1",
                Some(&roles(&["admin"])),
                &[admin.full_name()],
            )
            .unwrap();
        assert_eq!(outcome.subscribed, vec![admin.full_name()]);
        assert!(outcome.denied.is_empty());
    }

    #[test]
    fn subscribe_user_rejects_empty_input() {
        let registry = ChannelRegistry::new();
        assert_eq!(
            registry.subscribe_user("", "user-1", None, &[]).unwrap_err(),
            RegistryError::InvalidOrganization
        );
        assert_eq!(
            registry.subscribe_user("org-1", "", None, &[]).unwrap_err(),
            RegistryError::InvalidUser
        );
    }

    #[test]
    fn subscriptions_are_recorded_and_listed() {
        let registry = ChannelRegistry::new();
        let general = registry
            .create_channel("general", ChannelKind::Organization, "org-1", None, HashSet::new())
            .unwrap();
        let inbox = registry
            .create_channel(
                "inbox",
                ChannelKind::User,
                "org-1",
                Some("user-1".into()),
                HashSet::new(),
            )
            .unwrap();

        let outcome = registry
            .subscribe_user(
                "org-1",
                "user-1",
                None,
                &[general.full_name(), inbox.full_name()],
            )
            .unwrap();
        assert_eq!(outcome.subscribed.len(), 2);
        assert!(outcome.denied.is_empty());

        let subs = registry.get_user_subscriptions("org-1", "user-1");
        assert!(subs.contains(&general.full_name()));
        assert!(subs.contains(&inbox.full_name()));
    }

    #[test]
    fn unsubscribe_removes_only_listed() {
        let registry = ChannelRegistry::new();
        let general = registry
            .create_channel("general", ChannelKind::Organization, "org-1", None, HashSet::new())
            .unwrap();
        let metrics = registry
            .create_channel("metrics", ChannelKind::Metric, "org-1", None, HashSet::new())
            .unwrap();
        let _ = registry
            .subscribe_user(
                "org-1",
                "user-1",
                None,
                &[general.full_name(), metrics.full_name()],
            )
            .unwrap();

        let removed = registry.unsubscribe_user("org-1", "user-1", &[general.full_name()]);
        assert_eq!(removed, vec![general.full_name()]);
        assert_eq!(
            registry.get_user_subscriptions("org-1", "user-1"),
            vec![metrics.full_name()]
        );
        // Unsubscribing again is a no-op
        assert!(registry
            .unsubscribe_user("org-1", "user-1", &[general.full_name()])
            .is_empty());
    }

    #[test]
    fn default_channels_bootstrap() {
        let registry = ChannelRegistry::new();
        let created = registry.create_default_channels("org-42").unwrap();
        assert_eq!(created.len(), 5);

        let stats = registry.get_organization_stats("org-42");
        assert!(stats.total_channels >= 5);
        for expected in ["general", "metrics", "alerts", "admin", "logs"] {
            assert!(
                stats.channel_names.iter().any(|n| n.contains(expected)),
                "expected a channel containing '{expected}' in {:?}",
                stats.channel_names
            );
        }
    }

    #[test]
    fn default_channels_are_idempotent() {
        let registry = ChannelRegistry::new();
        let _ = registry.create_default_channels("org-42").unwrap();
        let _ = registry.create_default_channels("org-42").unwrap();
        assert_eq!(registry.get_organization_stats("org-42").total_channels, 5);
    }

    #[test]
    fn default_admin_and_logs_are_role_gated() {
        let registry = ChannelRegistry::new();
        let _ = registry.create_default_channels("org-1").unwrap();
        assert!(!registry.can_access_channel("admin:org-1:admin", "org-1", Some("u1"), None));
        assert!(registry.can_access_channel(
            "log:org-1:logs",
            "org-1",
            Some("u1"),
            Some(&roles(&["operator"]))
        ));
    }

    #[test]
    fn stats_for_unknown_org_are_empty() {
        let registry = ChannelRegistry::new();
        let stats = registry.get_organization_stats("nowhere");
        assert_eq!(stats.total_channels, 0);
        assert!(stats.channel_names.is_empty());
    }

    #[test]
    fn authorize_subscription_full_name_checks_acl() {
        let registry = ChannelRegistry::new();
        let _ = registry.create_default_channels("org-1").unwrap();
        assert_eq!(
            registry.authorize_subscription("metric:org-1:metrics", "org-1", Some("u1"), None),
            Some("metric:org-1:metrics".to_owned())
        );
        assert_eq!(
            registry.authorize_subscription("metric:org-1:metrics", "org-2", Some("u1"), None),
            None
        );
        assert_eq!(
            registry.authorize_subscription("admin:org-1:admin", "org-1", Some("u1"), None),
            None
        );
    }

    #[test]
    fn authorize_subscription_short_name_creates_lazily() {
        let registry = ChannelRegistry::new();
        let full = registry
            .authorize_subscription("live-feed", "org-1", Some("u1"), None)
            .unwrap();
        assert_eq!(full, "organization:org-1:live-feed");
        assert!(registry.channel(&full).is_some());
        // Second caller resolves to the same channel
        let again = registry
            .authorize_subscription("live-feed", "org-1", Some("u2"), None)
            .unwrap();
        assert_eq!(again, full);
    }

    #[test]
    fn ensure_from_full_name_creates_lazily() {
        let registry = ChannelRegistry::new();
        let channel = registry.ensure_from_full_name("metric:org-1:throughput").unwrap();
        assert_eq!(channel.full_name(), "metric:org-1:throughput");
        assert_eq!(channel.organization_id(), "org-1");
        assert_eq!(channel.kind(), ChannelKind::Metric);
        // Idempotent
        let again = registry.ensure_from_full_name("metric:org-1:throughput").unwrap();
        assert_eq!(again, channel);
    }

    #[test]
    fn ensure_from_full_name_parses_user_channels() {
        let registry = ChannelRegistry::new();
        let channel = registry
            .ensure_from_full_name("user:org-1:user-7:inbox")
            .unwrap();
        assert_eq!(channel.user_id(), Some("user-7"));
        assert_eq!(channel.full_name(), "user:org-1:user-7:inbox");
    }

    #[test]
    fn ensure_from_full_name_rejects_garbage() {
        let registry = ChannelRegistry::new();
        assert!(registry.ensure_from_full_name("noprefix").is_none());
        assert!(registry.ensure_from_full_name("bogus:org-1:x").is_none());
        assert!(registry.ensure_from_full_name("metric:org-1").is_none());
        assert!(registry.ensure_from_full_name("metric::x").is_none());
        assert!(registry.ensure_from_full_name("metric:org-1:").is_none());
    }

    #[test]
    fn concurrent_creates_are_safe() {
        use std::sync::Arc;
        let registry = Arc::new(ChannelRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let _ = registry.create_channel(
                            &format!("chan-{i}"),
                            ChannelKind::Organization,
                            "org-1",
                            None,
                            HashSet::new(),
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.get_organization_stats("org-1").total_channels, 50);
    }
}
