//! Node-local NetworkPolicy agent.
//!
//! The agent receives `NetworkPolicy`, `AddressGroup`, and `AppliedToGroup`
//! objects from the central controller, joins them in the rule cache, and
//! drives a dataplane reconciler from the cache's dirty-rule stream. The
//! watch transport and the dataplane itself live outside this workspace;
//! [`ResourceWatches`] and [`RuleReconciler`] are their seams.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod event;
mod queue;
mod reconciler;
#[cfg(test)]
mod tests;

pub use self::{
    event::{AddressGroupEvent, AppliedToGroupEvent, NetworkPolicyEvent, ResourceWatches},
    queue::DirtyQueue,
    reconciler::{reconcile, RuleReconciler},
};
pub use policy_agent_cache::{RuleCache, RuleLookup, SharedRuleCache};
pub use policy_agent_core::{CompletedRule, NodeInfo, RuleId};

use tracing::warn;

/// Creates the shared rule cache with its dirty stream wired to a
/// deduplicating work queue, ready for [`dispatch`] and [`reconcile`]
/// tasks.
pub fn cache_with_queue(node: NodeInfo) -> (SharedRuleCache, DirtyQueue) {
    let queue = DirtyQueue::new();
    let handler = {
        let queue = queue.clone();
        Box::new(move |id: &RuleId| queue.push(id.clone()))
    };
    (RuleCache::shared(node, handler), queue)
}

/// Applies upstream events to the cache until every watch channel closes.
///
/// This is the only writer of the cache; each event is applied atomically
/// under the cache's write lock.
pub async fn dispatch(cache: SharedRuleCache, watches: ResourceWatches) {
    let ResourceWatches {
        mut network_policies,
        mut address_groups,
        mut applied_to_groups,
    } = watches;

    loop {
        tokio::select! {
            Some(ev) = network_policies.recv() => apply_network_policy_event(&cache, ev),
            Some(ev) = address_groups.recv() => apply_address_group_event(&cache, ev),
            Some(ev) = applied_to_groups.recv() => apply_applied_to_group_event(&cache, ev),
            else => return,
        }
    }
}

fn apply_network_policy_event(cache: &SharedRuleCache, ev: NetworkPolicyEvent) {
    match ev {
        NetworkPolicyEvent::Added(policy) => cache.write().add_network_policy(policy),
        NetworkPolicyEvent::Updated(policy) => cache.write().update_network_policy(policy),
        NetworkPolicyEvent::Deleted(policy) => cache.write().delete_network_policy(&policy),
        NetworkPolicyEvent::Resynced(policies) => {
            cache.write().replace_network_policies(policies)
        }
    }
}

fn apply_address_group_event(cache: &SharedRuleCache, ev: AddressGroupEvent) {
    match ev {
        AddressGroupEvent::Added(group) => cache.write().add_address_group(group),
        AddressGroupEvent::Patched(patch) => {
            // A patch for a group the cache has dropped can race with the
            // delete; the controller follows up with a full add.
            if let Err(error) = cache.write().patch_address_group(patch) {
                warn!(%error, "dropping address group patch");
            }
        }
        AddressGroupEvent::Deleted(name) => cache.write().delete_address_group(&name),
        AddressGroupEvent::Resynced(groups) => cache.write().replace_address_groups(groups),
    }
}

fn apply_applied_to_group_event(cache: &SharedRuleCache, ev: AppliedToGroupEvent) {
    match ev {
        AppliedToGroupEvent::Added(group) => cache.write().add_applied_to_group(group),
        AppliedToGroupEvent::Patched(patch) => {
            if let Err(error) = cache.write().patch_applied_to_group(patch) {
                warn!(%error, "dropping applied-to group patch");
            }
        }
        AppliedToGroupEvent::Deleted(name) => cache.write().delete_applied_to_group(&name),
        AppliedToGroupEvent::Resynced(groups) => cache.write().replace_applied_to_groups(groups),
    }
}
