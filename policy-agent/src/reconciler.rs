use crate::queue::DirtyQueue;
use anyhow::Result;
use policy_agent_cache::{RuleLookup, SharedRuleCache};
use policy_agent_core::{CompletedRule, RuleId};

/// Programs completed rules into the local dataplane.
///
/// Implementations own all dataplane state; the agent only tells them which
/// rules to install and which to tear down.
#[async_trait::async_trait]
pub trait RuleReconciler: Send + Sync {
    /// Installs or refreshes a rule whose groups have all resolved.
    async fn reconcile(&self, rule: CompletedRule) -> Result<()>;

    /// Tears down a rule that no longer exists.
    async fn forget(&self, id: &RuleId) -> Result<()>;
}

/// Drives a reconciler from the dirty queue.
///
/// Each dequeued ID is re-read from the cache before acting: the dirty
/// stream only promises that the rule changed at some point, not that the
/// state observed at delivery matches any particular update. A rule that is
/// still incomplete is skipped; the group event completing it marks it
/// dirty again.
pub async fn reconcile<R: RuleReconciler>(cache: SharedRuleCache, queue: DirtyQueue, reconciler: R) {
    loop {
        let id = queue.pop().await;
        let lookup = cache.read().get_completed_rule(&id);
        let res = match lookup {
            RuleLookup::Complete(rule) => reconciler.reconcile(rule).await,
            RuleLookup::Missing => reconciler.forget(&id).await,
            RuleLookup::Incomplete => {
                tracing::trace!(rule = %id, "rule is not yet complete");
                continue;
            }
        };
        if let Err(error) = res {
            tracing::warn!(rule = %id, %error, "reconciliation failed; requeueing");
            queue.push(id);
        }
    }
}
