use crate::{
    Direction, NetworkPolicy, NetworkPolicyPeer, NetworkPolicyRule, PodReference, Service,
};
use ahash::AHashSet as HashSet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::BTreeSet, fmt, net::IpAddr, sync::Arc};

/// Content-derived identity of a translated rule.
///
/// Two rules share an ID iff their full semantic content, including the
/// owning policy's UID, is identical. Re-translating an unchanged policy
/// therefore yields the same IDs.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RuleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A single rule of a policy, paired with the policy state a node needs to
/// program it: the applied-to groups and the owning policy's UID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub id: RuleId,
    pub direction: Direction,
    pub from: NetworkPolicyPeer,
    pub to: NetworkPolicyPeer,
    pub services: Vec<Service>,
    pub applied_to_groups: Vec<String>,
    pub policy_uid: String,
}

/// The serialized form the rule ID is derived from. Field order is the
/// canonical order; changing it changes every ID.
#[derive(Serialize)]
struct RuleContent<'a> {
    direction: Direction,
    from: &'a NetworkPolicyPeer,
    to: &'a NetworkPolicyPeer,
    services: &'a [Service],
    applied_to_groups: &'a [String],
    policy_uid: &'a str,
}

impl Rule {
    /// Derives the rule owned by `policy` for one of its
    /// `NetworkPolicyRule`s.
    pub fn translate(policy: &NetworkPolicy, rule: &NetworkPolicyRule) -> Self {
        let content = RuleContent {
            direction: rule.direction,
            from: &rule.from,
            to: &rule.to,
            services: &rule.services,
            applied_to_groups: &policy.applied_to_groups,
            policy_uid: &policy.uid,
        };
        let canonical =
            serde_json::to_vec(&content).expect("rule content must serialize to JSON");
        let digest = Sha256::digest(&canonical);
        // The first 128 bits of the digest are the rule's identity.
        let id = RuleId(hex::encode(&digest[..16]));

        Self {
            id,
            direction: rule.direction,
            from: rule.from.clone(),
            to: rule.to.clone(),
            services: rule.services.clone(),
            applied_to_groups: policy.applied_to_groups.clone(),
            policy_uid: policy.uid.clone(),
        }
    }

    /// The address-group names this rule must resolve, from both peers.
    /// Duplicate references collapse.
    pub fn referenced_address_groups(&self) -> HashSet<&str> {
        self.from
            .address_groups
            .iter()
            .chain(self.to.address_groups.iter())
            .map(String::as_str)
            .collect()
    }
}

/// A rule joined with its fully resolved address and pod sets, ready to be
/// programmed into the dataplane. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedRule {
    pub rule: Arc<Rule>,
    pub from_addresses: BTreeSet<IpAddr>,
    pub to_addresses: BTreeSet<IpAddr>,
    pub pods: BTreeSet<PodReference>,
}
