//! Isolation policy and its translation into enforcement directives
//!
//! The two backends have fundamentally different security models:
//! - Sandbox: the hypervisor is the boundary. Only network policy applies.
//! - Container: shared kernel. Layered hardening (read-only root, capability
//!   drop, no-new-privileges) approximates sandbox-level isolation.
//!
//! Hardening directives are therefore emitted for the container backend only.

use orbit_core::{Backend, OrbitError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-project isolation policy (`sandbox` key of `.orbit/config.json`).
///
/// ```json
/// {
///   "network": { "mode": "allow", "allow": ["registry.npmjs.org"], "deny": [] },
///   "containerHardening": { "readOnlyRoot": true, "dropCapabilities": true, "noNewPrivileges": true }
/// }
/// ```
///
/// Every field defaults to its most restrictive value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IsolationPolicy {
    pub network: NetworkPolicy,
    /// Ignored when the backend is a hardware sandbox
    pub container_hardening: ContainerHardening,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkPolicy {
    pub mode: NetworkMode,
    /// Domains reachable when `mode` is `allow`
    pub allow: Vec<String>,
    /// Domains blocked when `mode` is `open`
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMode {
    /// No outbound networking at all
    #[default]
    #[serde(rename = "deny-all")]
    DenyAll,
    /// Only the allow-listed domains
    #[serde(rename = "allow", alias = "allow-list")]
    Allow,
    /// Everything except the deny-listed domains
    #[serde(rename = "open", alias = "open-with-denylist")]
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerHardening {
    pub read_only_root: bool,
    pub drop_capabilities: bool,
    pub no_new_privileges: bool,
}

impl Default for ContainerHardening {
    fn default() -> Self {
        Self {
            read_only_root: true,
            drop_capabilities: true,
            no_new_privileges: true,
        }
    }
}

impl IsolationPolicy {
    /// Parse the policy sub-document of a project configuration.
    ///
    /// An absent (or non-object) document yields the restrictive default.
    pub fn from_document(raw: Option<&serde_json::Value>) -> Result<Self> {
        let policy = match raw {
            Some(value @ serde_json::Value::Object(_)) => {
                serde_json::from_value::<Self>(value.clone())
                    .map_err(|e| OrbitError::InvalidPolicy(e.to_string()))?
            }
            _ => Self::default(),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Reject policies that would silently widen access.
    ///
    /// An `allow` policy with nothing listed would otherwise produce no
    /// network directive at all, i.e. unrestricted networking.
    pub fn validate(&self) -> Result<()> {
        if self.network.mode == NetworkMode::Allow && self.network.allow.is_empty() {
            return Err(OrbitError::InvalidPolicy(
                "network.allow must list at least one domain when network.mode is \"allow\""
                    .to_string(),
            ));
        }
        let blank = self
            .network
            .allow
            .iter()
            .chain(&self.network.deny)
            .any(|d| d.trim().is_empty() || d.contains(char::is_whitespace));
        if blank {
            return Err(OrbitError::InvalidPolicy(
                "network domains must be non-empty and contain no whitespace".to_string(),
            ));
        }
        Ok(())
    }
}

/// A single backend-specific enforcement instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "host", rename_all = "snake_case")]
pub enum Directive {
    DisableNetwork,
    AllowHost(String),
    DenyHost(String),
    ReadOnlyRoot,
    DropAllCapabilities,
    NoNewPrivileges,
}

impl Directive {
    /// Container-only hardening, never valid for a hypervisor-backed runtime
    pub fn is_hardening(&self) -> bool {
        matches!(
            self,
            Self::ReadOnlyRoot | Self::DropAllCapabilities | Self::NoNewPrivileges
        )
    }

    pub fn is_network(&self) -> bool {
        !self.is_hardening()
    }

    /// Command-line flag realizing this directive.
    ///
    /// Network flag names follow the sandbox CLI documentation and have not
    /// been confirmed against every engine release.
    pub fn flag(&self) -> String {
        match self {
            Self::DisableNetwork => "--network=none".to_string(),
            Self::AllowHost(host) => format!("--network-allow={host}"),
            Self::DenyHost(host) => format!("--network-deny={host}"),
            Self::ReadOnlyRoot => "--read-only".to_string(),
            Self::DropAllCapabilities => "--cap-drop=ALL".to_string(),
            Self::NoNewPrivileges => "--security-opt=no-new-privileges:true".to_string(),
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.flag())
    }
}

fn network_directives(network: &NetworkPolicy) -> Vec<Directive> {
    match network.mode {
        NetworkMode::DenyAll => vec![Directive::DisableNetwork],
        NetworkMode::Allow => network
            .allow
            .iter()
            .map(|host| Directive::AllowHost(host.clone()))
            .collect(),
        NetworkMode::Open => network
            .deny
            .iter()
            .map(|host| Directive::DenyHost(host.clone()))
            .collect(),
    }
}

fn hardening_directives(hardening: &ContainerHardening) -> Vec<Directive> {
    let mut directives = Vec::with_capacity(3);
    if hardening.read_only_root {
        directives.push(Directive::ReadOnlyRoot);
    }
    if hardening.drop_capabilities {
        directives.push(Directive::DropAllCapabilities);
    }
    if hardening.no_new_privileges {
        directives.push(Directive::NoNewPrivileges);
    }
    directives
}

/// Translate a policy into ordered directives: network first, then hardening
/// (container backend only). Pure and infallible.
pub fn to_directives(policy: &IsolationPolicy, backend: Backend) -> Vec<Directive> {
    let mut directives = network_directives(&policy.network);
    match backend {
        Backend::Sandbox => {}
        Backend::Container => directives.extend(hardening_directives(&policy.container_hardening)),
    }
    directives
}

/// Same as [`to_directives`], rendered to command-line flags
pub fn to_flags(policy: &IsolationPolicy, backend: Backend) -> Vec<String> {
    to_directives(policy, backend)
        .iter()
        .map(Directive::flag)
        .collect()
}

/// Stable one-line summary for status output
pub fn describe(policy: &IsolationPolicy, backend: Backend) -> String {
    let mut parts = Vec::new();

    parts.push(match policy.network.mode {
        NetworkMode::DenyAll => "Network: deny-all (no outbound)".to_string(),
        NetworkMode::Allow => format!(
            "Network: allowlist ({} domains)",
            policy.network.allow.len()
        ),
        NetworkMode::Open if policy.network.deny.is_empty() => "Network: open".to_string(),
        NetworkMode::Open => format!("Network: open ({} blocked)", policy.network.deny.len()),
    });

    match backend {
        Backend::Sandbox => parts.push("Isolation: microVM (hypervisor)".to_string()),
        Backend::Container => {
            let h = &policy.container_hardening;
            let hardening: Vec<&str> = [
                (h.read_only_root, "read-only root"),
                (h.drop_capabilities, "caps dropped"),
                (h.no_new_privileges, "no-new-privileges"),
            ]
            .into_iter()
            .filter_map(|(on, label)| on.then_some(label))
            .collect();
            if !hardening.is_empty() {
                parts.push(format!("Security: {}", hardening.join(", ")));
            }
        }
    }

    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn allow_policy(hosts: &[&str]) -> IsolationPolicy {
        IsolationPolicy {
            network: NetworkPolicy {
                mode: NetworkMode::Allow,
                allow: hosts.iter().map(|h| h.to_string()).collect(),
                deny: Vec::new(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_is_maximally_restrictive() {
        let policy = IsolationPolicy::from_document(None).unwrap();
        assert_eq!(policy.network.mode, NetworkMode::DenyAll);
        assert!(policy.container_hardening.read_only_root);
        assert!(policy.container_hardening.drop_capabilities);
        assert!(policy.container_hardening.no_new_privileges);

        let from_empty = IsolationPolicy::from_document(Some(&json!({}))).unwrap();
        assert_eq!(from_empty, policy);
        let from_garbage = IsolationPolicy::from_document(Some(&json!("yes"))).unwrap();
        assert_eq!(from_garbage, policy);
    }

    #[test]
    fn test_parse_camel_case_document() {
        let doc = json!({
            "network": { "mode": "open", "deny": ["evil.example"] },
            "containerHardening": { "readOnlyRoot": false }
        });
        let policy = IsolationPolicy::from_document(Some(&doc)).unwrap();
        assert_eq!(policy.network.mode, NetworkMode::Open);
        assert_eq!(policy.network.deny, vec!["evil.example"]);
        assert!(!policy.container_hardening.read_only_root);
        assert!(policy.container_hardening.drop_capabilities);
    }

    #[test]
    fn test_mode_aliases() {
        let doc = json!({ "network": { "mode": "allow-list", "allow": ["a.com"] } });
        let policy = IsolationPolicy::from_document(Some(&doc)).unwrap();
        assert_eq!(policy.network.mode, NetworkMode::Allow);
    }

    #[test]
    fn test_invalid_documents() {
        let unknown_mode = json!({ "network": { "mode": "sometimes" } });
        assert!(matches!(
            IsolationPolicy::from_document(Some(&unknown_mode)),
            Err(OrbitError::InvalidPolicy(_))
        ));

        let empty_allow = json!({ "network": { "mode": "allow" } });
        assert!(matches!(
            IsolationPolicy::from_document(Some(&empty_allow)),
            Err(OrbitError::InvalidPolicy(_))
        ));

        let blank_host = json!({ "network": { "mode": "open", "deny": [" "] } });
        assert!(IsolationPolicy::from_document(Some(&blank_host)).is_err());
    }

    #[test]
    fn test_allow_list_on_container() {
        let directives = to_directives(&allow_policy(&["a.com", "b.com"]), Backend::Container);
        assert_eq!(
            directives,
            vec![
                Directive::AllowHost("a.com".into()),
                Directive::AllowHost("b.com".into()),
                Directive::ReadOnlyRoot,
                Directive::DropAllCapabilities,
                Directive::NoNewPrivileges,
            ]
        );
        assert_eq!(
            to_flags(&allow_policy(&["a.com"]), Backend::Container),
            vec![
                "--network-allow=a.com",
                "--read-only",
                "--cap-drop=ALL",
                "--security-opt=no-new-privileges:true",
            ]
        );
    }

    #[test]
    fn test_sandbox_gets_network_only() {
        let flags = to_flags(&IsolationPolicy::default(), Backend::Sandbox);
        assert_eq!(flags, vec!["--network=none"]);
    }

    #[test]
    fn test_describe() {
        let policy = IsolationPolicy::default();
        assert_eq!(
            describe(&policy, Backend::Sandbox),
            "Network: deny-all (no outbound) | Isolation: microVM (hypervisor)"
        );
        assert_eq!(
            describe(&policy, Backend::Container),
            "Network: deny-all (no outbound) | Security: read-only root, caps dropped, no-new-privileges"
        );
        assert_eq!(
            describe(&allow_policy(&["a.com", "b.com"]), Backend::Sandbox),
            "Network: allowlist (2 domains) | Isolation: microVM (hypervisor)"
        );

        let mut open = IsolationPolicy::default();
        open.network.mode = NetworkMode::Open;
        open.container_hardening = ContainerHardening {
            read_only_root: false,
            drop_capabilities: false,
            no_new_privileges: false,
        };
        assert_eq!(describe(&open, Backend::Container), "Network: open");
        open.network.deny = vec!["x.io".into()];
        assert_eq!(describe(&open, Backend::Sandbox), "Network: open (1 blocked) | Isolation: microVM (hypervisor)");
    }

    fn arb_policy() -> impl Strategy<Value = IsolationPolicy> {
        let mode = prop_oneof![
            Just(NetworkMode::DenyAll),
            Just(NetworkMode::Allow),
            Just(NetworkMode::Open),
        ];
        let hosts = || proptest::collection::vec("[a-z]{1,8}\\.(com|io|dev)", 0..6);
        (mode, hosts(), hosts(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
            |(mode, allow, deny, ro, caps, nnp)| IsolationPolicy {
                network: NetworkPolicy { mode, allow, deny },
                container_hardening: ContainerHardening {
                    read_only_root: ro,
                    drop_capabilities: caps,
                    no_new_privileges: nnp,
                },
            },
        )
    }

    proptest! {
        #[test]
        fn prop_sandbox_never_hardened(policy in arb_policy()) {
            let directives = to_directives(&policy, Backend::Sandbox);
            prop_assert!(directives.iter().all(|d| !d.is_hardening()));
            let summary = describe(&policy, Backend::Sandbox);
            prop_assert!(!summary.contains("Security:"));
        }

        #[test]
        fn prop_network_directive_count(policy in arb_policy()) {
            let expected = match policy.network.mode {
                NetworkMode::DenyAll => 1,
                NetworkMode::Allow => policy.network.allow.len(),
                NetworkMode::Open => policy.network.deny.len(),
            };
            for backend in [Backend::Sandbox, Backend::Container] {
                let directives = to_directives(&policy, backend);
                let network = directives.iter().filter(|d| d.is_network()).count();
                prop_assert_eq!(network, expected);
            }
        }

        #[test]
        fn prop_network_precedes_hardening(policy in arb_policy()) {
            let directives = to_directives(&policy, Backend::Container);
            let first_hardening = directives.iter().position(Directive::is_hardening);
            if let Some(idx) = first_hardening {
                prop_assert!(directives[idx..].iter().all(Directive::is_hardening));
            }
        }
    }
}
