use std::collections::HashSet;

use gateway_core::config::{DmPolicy, GroupPolicy};

/// A policy-gate refusal, carrying the reason surfaced on `PolicyDenied`
/// diagnostics (spec §4.3, §7). Never shown to the sender — policy denials
/// are silent, per spec §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub reason: &'static str,
}

impl Denial {
    const fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

/// Outcome of the DM policy gate. Distinct from a plain `Result` because
/// `pairing` is neither an admit nor a silent drop — it triggers a
/// side-effecting reply (spec §4.4), so callers must handle it explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmDecision {
    Admit,
    Denied(Denial),
    NeedsPairing,
}

/// `allowFrom`/`groupAllowFrom` union check (spec §4.3 items 4-5): the
/// config list and the persisted store are both consulted, and `"*"` in
/// either allows everyone. An empty union denies everyone, matching the
/// deny-by-default convention every channel adapter in the pack uses for
/// its own allowlist.
pub fn is_allowed(config_list: &[String], store_set: &HashSet<String>, identifier: &str) -> bool {
    if config_list.is_empty() && store_set.is_empty() {
        return false;
    }
    config_list.iter().any(|e| e == "*" || e == identifier)
        || store_set.contains("*")
        || store_set.contains(identifier)
}

/// Spec §4.3 item 4: group policy gate, applied after `requireMention`.
pub fn check_group_policy(
    policy: GroupPolicy,
    chat_id: &str,
    config_allow_from: &[String],
    store_allow_from: &HashSet<String>,
    require_mention: bool,
    mentions_bot: bool,
) -> Result<(), Denial> {
    match policy {
        GroupPolicy::Disabled => return Err(Denial::new("group messages disabled")),
        GroupPolicy::Allowlist => {
            if !is_allowed(config_allow_from, store_allow_from, chat_id) {
                return Err(Denial::new("not in allowlist"));
            }
        }
        GroupPolicy::Open => {}
    }

    if require_mention && !mentions_bot {
        return Err(Denial::new("did not mention bot"));
    }

    Ok(())
}

/// Spec §4.3 item 5: DM policy gate.
pub fn check_dm_policy(
    policy: DmPolicy,
    sender_id: &str,
    config_allow_from: &[String],
    store_allow_from: &HashSet<String>,
) -> DmDecision {
    let allowed = is_allowed(config_allow_from, store_allow_from, sender_id);
    match policy {
        DmPolicy::Disabled => DmDecision::Denied(Denial::new("direct messages disabled")),
        DmPolicy::Allowlist => {
            if allowed {
                DmDecision::Admit
            } else {
                DmDecision::Denied(Denial::new("not in allowlist"))
            }
        }
        DmPolicy::Open => DmDecision::Admit,
        DmPolicy::Pairing => {
            if allowed {
                DmDecision::Admit
            } else {
                DmDecision::NeedsPairing
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_union_denies_all() {
        assert!(!is_allowed(&[], &HashSet::new(), "u1"));
    }

    #[test]
    fn wildcard_in_config_allows_all() {
        let list = vec!["*".to_string()];
        assert!(is_allowed(&list, &HashSet::new(), "u1"));
    }

    #[test]
    fn wildcard_in_store_allows_all() {
        let mut store = HashSet::new();
        store.insert("*".to_string());
        assert!(is_allowed(&[], &store, "u1"));
    }

    #[test]
    fn config_and_store_are_unioned() {
        let config = vec!["u1".to_string()];
        let mut store = HashSet::new();
        store.insert("u2".to_string());
        assert!(is_allowed(&config, &store, "u1"));
        assert!(is_allowed(&config, &store, "u2"));
        assert!(!is_allowed(&config, &store, "u3"));
    }

    #[test]
    fn group_disabled_denies_regardless_of_allowlist() {
        let err = check_group_policy(
            GroupPolicy::Disabled,
            "g1",
            &["g1".to_string()],
            &HashSet::new(),
            false,
            false,
        )
        .unwrap_err();
        assert_eq!(err.reason, "group messages disabled");
    }

    #[test]
    fn group_allowlist_blocks_non_member() {
        let err = check_group_policy(
            GroupPolicy::Allowlist,
            "g1",
            &[],
            &HashSet::new(),
            false,
            false,
        )
        .unwrap_err();
        assert_eq!(err.reason, "not in allowlist");
    }

    #[test]
    fn group_allowlist_passes_member_with_mention() {
        let store: HashSet<String> = ["g1".to_string()].into_iter().collect();
        assert!(check_group_policy(GroupPolicy::Allowlist, "g1", &[], &store, true, true).is_ok());
    }

    #[test]
    fn require_mention_blocks_when_absent() {
        let err = check_group_policy(GroupPolicy::Open, "g1", &[], &HashSet::new(), true, false)
            .unwrap_err();
        assert_eq!(err.reason, "did not mention bot");
    }

    #[test]
    fn dm_pairing_admits_known_sender() {
        let config = vec!["u1".to_string()];
        assert_eq!(
            check_dm_policy(DmPolicy::Pairing, "u1", &config, &HashSet::new()),
            DmDecision::Admit
        );
    }

    #[test]
    fn dm_pairing_triggers_pairing_for_unknown_sender() {
        assert_eq!(
            check_dm_policy(DmPolicy::Pairing, "u1", &[], &HashSet::new()),
            DmDecision::NeedsPairing
        );
    }

    #[test]
    fn dm_disabled_always_denies() {
        let config = vec!["u1".to_string()];
        assert!(matches!(
            check_dm_policy(DmPolicy::Disabled, "u1", &config, &HashSet::new()),
            DmDecision::Denied(_)
        ));
    }
}
