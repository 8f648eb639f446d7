//! The rule cache: joins `NetworkPolicy`, `AddressGroup`, and
//! `AppliedToGroup` state arriving independently from the controller into
//! completed rules for the local dataplane.
//!
//! The three object kinds reference each other by name and arrive in any
//! order, so a rule is programmable only once every group it references is
//! known. The cache stores partial state, detects when a rule's completed
//! projection may have changed, and reports the affected rule IDs through a
//! dirty handler invoked under the cache's write lock.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod metrics;
mod store;

use self::store::RuleStore;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::RwLock;
use policy_agent_core::{
    AddressGroup, AddressGroupPatch, AppliedToGroup, AppliedToGroupPatch, CompletedRule,
    NetworkPolicy, NodeInfo, PodReference, Rule, RuleId,
};
use std::{collections::BTreeSet, fmt, net::IpAddr, sync::Arc};

/// The cache, shared between the event dispatcher (writes) and rule
/// consumers (reads).
pub type SharedRuleCache = Arc<RwLock<RuleCache>>;

/// Invoked with each rule ID whose completed projection may have changed.
///
/// Called synchronously while the cache's write lock is held, so the
/// handler must not block and must not call back into the cache. Handing
/// the ID to a deduplicating work queue is the expected implementation.
pub type DirtyHandler = Box<dyn Fn(&RuleId) + Send + Sync>;

/// Returned by a patch that names a group the cache has never seen.
///
/// Recoverable: the caller drops the patch and a later full add of the
/// group reconciles the membership.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("group {0} is not in the cache")]
pub struct GroupNotFound(pub String);

/// The result of looking up a rule's completed projection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleLookup {
    /// No rule with the queried ID exists.
    Missing,
    /// The rule exists but at least one group it references is unknown.
    Incomplete,
    Complete(CompletedRule),
}

impl RuleLookup {
    pub fn completed(self) -> Option<CompletedRule> {
        match self {
            RuleLookup::Complete(rule) => Some(rule),
            _ => None,
        }
    }
}

/// Joins policy rules with the address and applied-to groups they
/// reference.
///
/// All state lives behind one lock: every mutator holds the write lock
/// across state mutation, dirty computation, and handler invocation, so an
/// observer sees each mutation atomically and the dirty stream never misses
/// a change.
pub struct RuleCache {
    node: NodeInfo,

    rules: RuleStore,

    /// Known address groups. An empty membership set is a known group;
    /// rules referencing it resolve to an empty address set.
    address_groups: HashMap<String, BTreeSet<IpAddr>>,

    /// Known applied-to groups, same absence semantics as address groups.
    applied_to_groups: HashMap<String, BTreeSet<PodReference>>,

    /// Rule IDs currently derived from each policy UID. A policy with no
    /// rules keeps an empty entry so it remains observable until deleted.
    policy_rules: HashMap<String, HashSet<RuleId>>,

    dirty: DirtyHandler,
}

// === impl RuleCache ===

impl RuleCache {
    /// Creates a cache for the given node. `dirty` receives the IDs of
    /// rules whose completed projection may have changed; see
    /// [`DirtyHandler`] for its obligations.
    pub fn new(node: NodeInfo, dirty: DirtyHandler) -> Self {
        Self {
            node,
            rules: RuleStore::default(),
            address_groups: HashMap::default(),
            applied_to_groups: HashMap::default(),
            policy_rules: HashMap::default(),
            dirty,
        }
    }

    pub fn shared(node: NodeInfo, dirty: DirtyHandler) -> SharedRuleCache {
        Arc::new(RwLock::new(Self::new(node, dirty)))
    }

    /// The node identity supplied at construction. Node addresses are never
    /// filtered out of resolved address sets; self-traffic handling is the
    /// dataplane's concern.
    pub fn node(&self) -> &NodeInfo {
        &self.node
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn policy_count(&self) -> usize {
        self.policy_rules.len()
    }

    pub fn address_group_count(&self) -> usize {
        self.address_groups.len()
    }

    pub fn applied_to_group_count(&self) -> usize {
        self.applied_to_groups.len()
    }

    /// Inserts the rules of a policy not seen before.
    ///
    /// Re-adding a live policy is tolerated and behaves as an update: only
    /// rules that actually appear or disappear are marked dirty.
    pub fn add_network_policy(&mut self, policy: NetworkPolicy) {
        tracing::debug!(
            uid = %policy.uid,
            ns = %policy.namespace,
            name = %policy.name,
            rules = policy.rules.len(),
            "adding network policy",
        );
        self.apply_policy(policy);
    }

    /// Replaces a policy's rules with those derived from the new object.
    ///
    /// Rules whose content (and therefore ID) is unchanged are left alone
    /// and not marked dirty; the dirty set is exactly the rules removed
    /// plus the rules added.
    pub fn update_network_policy(&mut self, policy: NetworkPolicy) {
        tracing::debug!(
            uid = %policy.uid,
            ns = %policy.namespace,
            name = %policy.name,
            rules = policy.rules.len(),
            "updating network policy",
        );
        self.apply_policy(policy);
    }

    fn apply_policy(&mut self, policy: NetworkPolicy) {
        let new_rules = policy
            .rules
            .iter()
            .map(|r| Rule::translate(&policy, r))
            .collect::<Vec<_>>();
        let new_ids = new_rules
            .iter()
            .map(|r| r.id.clone())
            .collect::<HashSet<_>>();
        let old_ids = self
            .policy_rules
            .insert(policy.uid.clone(), new_ids.clone())
            .unwrap_or_default();

        let mut dirty = HashSet::default();
        for id in old_ids.difference(&new_ids) {
            self.rules.remove(id);
            dirty.insert(id.clone());
        }
        for rule in new_rules {
            if !old_ids.contains(&rule.id) {
                dirty.insert(rule.id.clone());
                self.rules.insert(rule);
            }
        }

        self.mark_dirty(dirty);
    }

    /// Removes every rule derived from the policy. Deleting a policy the
    /// cache has never seen is a no-op.
    pub fn delete_network_policy(&mut self, policy: &NetworkPolicy) {
        let Some(old_ids) = self.policy_rules.remove(&policy.uid) else {
            tracing::trace!(uid = %policy.uid, "deleting unknown network policy");
            return;
        };
        tracing::debug!(
            uid = %policy.uid,
            ns = %policy.namespace,
            name = %policy.name,
            rules = old_ids.len(),
            "deleting network policy",
        );
        for id in &old_ids {
            self.rules.remove(id);
        }
        self.mark_dirty(old_ids);
    }

    /// Installs the new authoritative policy set after a watch reconnect.
    ///
    /// Rules present before and after keep their IDs and are not marked
    /// dirty; the dirty set is the symmetric difference of the old and new
    /// rule-ID sets.
    pub fn replace_network_policies(&mut self, policies: Vec<NetworkPolicy>) {
        let mut new_policy_rules = HashMap::<String, HashSet<RuleId>>::default();
        let mut new_rules = Vec::new();
        for policy in &policies {
            let ids = new_policy_rules.entry(policy.uid.clone()).or_default();
            for r in &policy.rules {
                let rule = Rule::translate(policy, r);
                ids.insert(rule.id.clone());
                new_rules.push(rule);
            }
        }
        let new_ids = new_rules
            .iter()
            .map(|r| r.id.clone())
            .collect::<HashSet<_>>();
        let old_ids = self.rules.ids().cloned().collect::<HashSet<_>>();

        let mut dirty = HashSet::default();
        for id in old_ids.difference(&new_ids) {
            self.rules.remove(id);
            dirty.insert(id.clone());
        }
        for rule in new_rules {
            if !old_ids.contains(&rule.id) {
                dirty.insert(rule.id.clone());
                self.rules.insert(rule);
            }
        }
        self.policy_rules = new_policy_rules;

        tracing::debug!(
            policies = self.policy_rules.len(),
            rules = self.rules.len(),
            dirty = dirty.len(),
            "replaced network policies",
        );
        self.mark_dirty(dirty);
    }

    /// Installs or replaces an address group's membership and marks every
    /// rule referencing it, whether or not the membership changed.
    pub fn add_address_group(&mut self, group: AddressGroup) {
        let AddressGroup { name, addresses } = group;
        let members = addresses.into_iter().collect::<BTreeSet<_>>();
        tracing::debug!(group = %name, addresses = members.len(), "adding address group");
        self.address_groups.insert(name.clone(), members);
        self.mark_dirty(self.rules.rules_for_address_group(&name));
    }

    /// Applies a membership delta to a known address group. Removals apply
    /// before additions; deltas already reflected in the membership are
    /// tolerated. Every referencing rule is marked dirty.
    pub fn patch_address_group(&mut self, patch: AddressGroupPatch) -> Result<(), GroupNotFound> {
        let members = self
            .address_groups
            .get_mut(&patch.name)
            .ok_or_else(|| GroupNotFound(patch.name.clone()))?;
        for addr in &patch.removed {
            members.remove(addr);
        }
        members.extend(patch.added.iter().copied());
        tracing::debug!(
            group = %patch.name,
            added = patch.added.len(),
            removed = patch.removed.len(),
            "patched address group",
        );
        self.mark_dirty(self.rules.rules_for_address_group(&patch.name));
        Ok(())
    }

    /// Forgets an address group; rules referencing it become incomplete.
    /// Unknown names are a no-op.
    pub fn delete_address_group(&mut self, name: &str) {
        if self.address_groups.remove(name).is_none() {
            tracing::trace!(group = %name, "deleting unknown address group");
            return;
        }
        tracing::debug!(group = %name, "deleting address group");
        self.mark_dirty(self.rules.rules_for_address_group(name));
    }

    /// Installs the new authoritative address-group set after a watch
    /// reconnect. Only rules referencing a group whose membership differs
    /// (including groups appearing or vanishing) are marked dirty.
    pub fn replace_address_groups(&mut self, groups: Vec<AddressGroup>) {
        let new_groups = groups
            .into_iter()
            .map(|g| (g.name, g.addresses.into_iter().collect::<BTreeSet<_>>()))
            .collect::<HashMap<_, _>>();

        let mut dirty = HashSet::default();
        for (name, members) in &self.address_groups {
            if new_groups.get(name) != Some(members) {
                dirty.extend(self.rules.rules_for_address_group(name));
            }
        }
        for name in new_groups.keys() {
            if !self.address_groups.contains_key(name) {
                dirty.extend(self.rules.rules_for_address_group(name));
            }
        }
        self.address_groups = new_groups;

        tracing::debug!(
            groups = self.address_groups.len(),
            dirty = dirty.len(),
            "replaced address groups",
        );
        self.mark_dirty(dirty);
    }

    /// Installs or replaces an applied-to group's membership and marks
    /// every rule referencing it.
    pub fn add_applied_to_group(&mut self, group: AppliedToGroup) {
        let AppliedToGroup { name, pods } = group;
        let members = pods.into_iter().collect::<BTreeSet<_>>();
        tracing::debug!(group = %name, pods = members.len(), "adding applied-to group");
        self.applied_to_groups.insert(name.clone(), members);
        self.mark_dirty(self.rules.rules_for_applied_to_group(&name));
    }

    /// Applies a membership delta to a known applied-to group; semantics
    /// mirror [`RuleCache::patch_address_group`].
    pub fn patch_applied_to_group(
        &mut self,
        patch: AppliedToGroupPatch,
    ) -> Result<(), GroupNotFound> {
        let members = self
            .applied_to_groups
            .get_mut(&patch.name)
            .ok_or_else(|| GroupNotFound(patch.name.clone()))?;
        for pod in &patch.removed {
            members.remove(pod);
        }
        members.extend(patch.added.iter().cloned());
        tracing::debug!(
            group = %patch.name,
            added = patch.added.len(),
            removed = patch.removed.len(),
            "patched applied-to group",
        );
        self.mark_dirty(self.rules.rules_for_applied_to_group(&patch.name));
        Ok(())
    }

    /// Forgets an applied-to group; rules referencing it become
    /// incomplete. Unknown names are a no-op.
    pub fn delete_applied_to_group(&mut self, name: &str) {
        if self.applied_to_groups.remove(name).is_none() {
            tracing::trace!(group = %name, "deleting unknown applied-to group");
            return;
        }
        tracing::debug!(group = %name, "deleting applied-to group");
        self.mark_dirty(self.rules.rules_for_applied_to_group(name));
    }

    /// Installs the new authoritative applied-to-group set after a watch
    /// reconnect; dirty semantics mirror
    /// [`RuleCache::replace_address_groups`].
    pub fn replace_applied_to_groups(&mut self, groups: Vec<AppliedToGroup>) {
        let new_groups = groups
            .into_iter()
            .map(|g| (g.name, g.pods.into_iter().collect::<BTreeSet<_>>()))
            .collect::<HashMap<_, _>>();

        let mut dirty = HashSet::default();
        for (name, members) in &self.applied_to_groups {
            if new_groups.get(name) != Some(members) {
                dirty.extend(self.rules.rules_for_applied_to_group(name));
            }
        }
        for name in new_groups.keys() {
            if !self.applied_to_groups.contains_key(name) {
                dirty.extend(self.rules.rules_for_applied_to_group(name));
            }
        }
        self.applied_to_groups = new_groups;

        tracing::debug!(
            groups = self.applied_to_groups.len(),
            dirty = dirty.len(),
            "replaced applied-to groups",
        );
        self.mark_dirty(dirty);
    }

    /// Looks up a rule and joins it with the groups it references.
    ///
    /// Consumers must re-read after dequeuing a dirty ID: no ordering is
    /// promised between handler invocation and this query.
    pub fn get_completed_rule(&self, id: &RuleId) -> RuleLookup {
        let Some(rule) = self.rules.get(id) else {
            return RuleLookup::Missing;
        };

        let mut from_addresses = BTreeSet::new();
        for name in &rule.from.address_groups {
            match self.address_groups.get(name) {
                Some(members) => from_addresses.extend(members.iter().copied()),
                None => return RuleLookup::Incomplete,
            }
        }
        let mut to_addresses = BTreeSet::new();
        for name in &rule.to.address_groups {
            match self.address_groups.get(name) {
                Some(members) => to_addresses.extend(members.iter().copied()),
                None => return RuleLookup::Incomplete,
            }
        }
        let mut pods = BTreeSet::new();
        for name in &rule.applied_to_groups {
            match self.applied_to_groups.get(name) {
                Some(members) => pods.extend(members.iter().cloned()),
                None => return RuleLookup::Incomplete,
            }
        }

        RuleLookup::Complete(CompletedRule {
            rule: rule.clone(),
            from_addresses,
            to_addresses,
            pods,
        })
    }

    /// Reports each affected ID through the dirty handler, once per
    /// mutator call.
    fn mark_dirty(&self, ids: HashSet<RuleId>) {
        for id in &ids {
            tracing::trace!(rule = %id, "rule marked dirty");
            (self.dirty)(id);
        }
    }
}

impl fmt::Debug for RuleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleCache")
            .field("node", &self.node)
            .field("rules", &self.rules)
            .field("address_groups", &self.address_groups)
            .field("applied_to_groups", &self.applied_to_groups)
            .field("policy_rules", &self.policy_rules)
            .finish_non_exhaustive()
    }
}
