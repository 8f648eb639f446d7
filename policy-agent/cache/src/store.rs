use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use policy_agent_core::{Rule, RuleId};
use std::{collections::hash_map::Entry, sync::Arc};

/// Holds all live rules, indexed by ID and by every group name a rule
/// references.
///
/// The secondary indices are maintained inline on insert/remove so that the
/// set of rules touched by a group change is a single lookup.
#[derive(Debug, Default)]
pub(crate) struct RuleStore {
    pub(crate) by_id: HashMap<RuleId, Arc<Rule>>,
    pub(crate) by_address_group: HashMap<String, HashSet<RuleId>>,
    pub(crate) by_applied_to_group: HashMap<String, HashSet<RuleId>>,
}

impl RuleStore {
    pub(crate) fn get(&self, id: &RuleId) -> Option<&Arc<Rule>> {
        self.by_id.get(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = &RuleId> {
        self.by_id.keys()
    }

    /// Inserts a rule, indexing it under every group it references.
    ///
    /// Re-inserting an ID is a no-op by construction: the ID is derived
    /// from the rule's content, so the replacement is identical.
    pub(crate) fn insert(&mut self, rule: Rule) {
        let rule = Arc::new(rule);
        for group in rule.referenced_address_groups() {
            self.by_address_group
                .entry(group.to_string())
                .or_default()
                .insert(rule.id.clone());
        }
        for group in &rule.applied_to_groups {
            self.by_applied_to_group
                .entry(group.clone())
                .or_default()
                .insert(rule.id.clone());
        }
        self.by_id.insert(rule.id.clone(), rule);
    }

    pub(crate) fn remove(&mut self, id: &RuleId) -> Option<Arc<Rule>> {
        let rule = self.by_id.remove(id)?;
        for group in rule.referenced_address_groups() {
            unindex(&mut self.by_address_group, group, id);
        }
        for group in &rule.applied_to_groups {
            unindex(&mut self.by_applied_to_group, group, id);
        }
        Some(rule)
    }

    /// The IDs of all rules referencing the named address group.
    pub(crate) fn rules_for_address_group(&self, name: &str) -> HashSet<RuleId> {
        self.by_address_group.get(name).cloned().unwrap_or_default()
    }

    /// The IDs of all rules referencing the named applied-to group.
    pub(crate) fn rules_for_applied_to_group(&self, name: &str) -> HashSet<RuleId> {
        self.by_applied_to_group
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

/// Drops `id` from the index bucket for `group`, removing the bucket once
/// empty so the index holds no stale keys.
fn unindex(index: &mut HashMap<String, HashSet<RuleId>>, group: &str, id: &RuleId) {
    if let Entry::Occupied(mut bucket) = index.entry(group.to_string()) {
        bucket.get_mut().remove(id);
        if bucket.get().is_empty() {
            bucket.remove();
        }
    }
}
