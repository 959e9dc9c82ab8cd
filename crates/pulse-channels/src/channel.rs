//! Channel type and identity.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Channel category. Determines the full-name prefix and, for
/// [`ChannelKind::User`], the private-channel access rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Organization-wide broadcast.
    Organization,
    /// Metrics ticks.
    Metric,
    /// Alerts.
    Alert,
    /// Administrative commands.
    Admin,
    /// Private per-user channel.
    User,
    /// Log streaming.
    Log,
}

impl ChannelKind {
    /// Stable prefix used in channel full names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Metric => "metric",
            Self::Alert => "alert",
            Self::Admin => "admin",
            Self::User => "user",
            Self::Log => "log",
        }
    }

    /// Parse a full-name prefix back into a kind.
    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "organization" => Some(Self::Organization),
            "metric" => Some(Self::Metric),
            "alert" => Some(Self::Alert),
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            "log" => Some(Self::Log),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, typed topic scoped to one tenant.
///
/// The owning `organization_id` never changes after creation; the struct
/// exposes read accessors only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    name: String,
    kind: ChannelKind,
    organization_id: String,
    user_id: Option<String>,
    required_roles: HashSet<String>,
}

impl Channel {
    /// Create a channel. `user_id` is meaningful only for
    /// [`ChannelKind::User`] channels.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: ChannelKind,
        organization_id: impl Into<String>,
        user_id: Option<String>,
        required_roles: HashSet<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            organization_id: organization_id.into(),
            user_id,
            required_roles,
        }
    }

    /// Logical channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel kind.
    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Owning organization.
    #[must_use]
    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    /// Owning user, for private channels.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Roles gating access; empty means no role restriction.
    #[must_use]
    pub fn required_roles(&self) -> &HashSet<String> {
        &self.required_roles
    }

    /// Globally unique identity: `kind:org[:user]:name`. Doubles as the
    /// backbone topic key for this channel.
    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.user_id {
            Some(user) => format!(
                "{}:{}:{}:{}",
                self.kind.as_str(),
                self.organization_id,
                user,
                self.name
            ),
            None => format!(
                "{}:{}:{}",
                self.kind.as_str(),
                self.organization_id,
                self.name
            ),
        }
    }
}
