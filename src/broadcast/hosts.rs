use serde::{Deserialize, Serialize};

use crate::commands::Account;

/// One gateway endpoint, e.g. `https://api.ultramsg.com`.
///
/// An endpoint with a `region_hint` is preferred for accounts whose raw
/// instance id contains the hint (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEndpoint {
    pub base_url: String,
    #[serde(default)]
    pub region_hint: Option<String>,
}

impl HostEndpoint {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            region_hint: None,
        }
    }

    pub fn with_region_hint(mut self, hint: &str) -> Self {
        self.region_hint = Some(hint.to_string());
        self
    }

    fn matches_region(&self, raw_instance_id: &str) -> bool {
        match &self.region_hint {
            Some(hint) if !hint.is_empty() => raw_instance_id
                .to_lowercase()
                .contains(&hint.to_lowercase()),
            _ => false,
        }
    }

    pub fn instance_url(&self, account: &Account, path: &str) -> String {
        format!(
            "{}/instance{}/{}",
            self.base_url.trim_end_matches('/'),
            clean_instance_id(&account.instance_id),
            path.trim_start_matches('/')
        )
    }
}

pub fn default_hosts() -> Vec<HostEndpoint> {
    vec![
        HostEndpoint::new("https://api.ultramsg.com"),
        HostEndpoint::new("https://hk.ultramsg.com").with_region_hint("hk"),
    ]
}

/// Strip the provider's literal `instance` prefix from an instance id.
pub fn clean_instance_id(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("instance")
        .unwrap_or(trimmed)
        .to_string()
}

/// Order hosts for an account: region matches first, then the rest, both
/// keeping their configured order.
pub fn ordered_hosts(hosts: &[HostEndpoint], account: &Account) -> Vec<HostEndpoint> {
    let (mut preferred, rest): (Vec<_>, Vec<_>) = hosts
        .iter()
        .cloned()
        .partition(|host| host.matches_region(&account.instance_id));
    preferred.extend(rest);
    preferred
}

/// Host used for the given 0-based upload attempt (round robin).
pub fn host_for_attempt(ordered: &[HostEndpoint], attempt: usize) -> Option<&HostEndpoint> {
    if ordered.is_empty() {
        None
    } else {
        ordered.get(attempt % ordered.len())
    }
}
