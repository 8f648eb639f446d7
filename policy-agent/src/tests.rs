use crate::{
    cache_with_queue, dispatch, reconcile, AddressGroupEvent, AppliedToGroupEvent, CompletedRule,
    NetworkPolicyEvent, NodeInfo, ResourceWatches, RuleId, RuleReconciler,
};
use ahash::AHashMap as HashMap;
use anyhow::Result;
use maplit::btreeset;
use parking_lot::Mutex;
use policy_agent_core::{
    AddressGroup, AddressGroupPatch, AppliedToGroup, Direction, NetworkPolicy, NetworkPolicyPeer,
    NetworkPolicyRule, PodReference, Rule,
};
use std::{net::IpAddr, sync::Arc, time::Duration};
use tokio::sync::mpsc;

/// Stands in for the dataplane: records the rules it was asked to install
/// and tear down.
#[derive(Clone, Debug, Default)]
struct RecordingDataplane {
    rules: Arc<Mutex<HashMap<RuleId, CompletedRule>>>,
    forgotten: Arc<Mutex<Vec<RuleId>>>,
}

#[async_trait::async_trait]
impl RuleReconciler for RecordingDataplane {
    async fn reconcile(&self, rule: CompletedRule) -> Result<()> {
        self.rules.lock().insert(rule.rule.id.clone(), rule);
        Ok(())
    }

    async fn forget(&self, id: &RuleId) -> Result<()> {
        self.rules.lock().remove(id);
        self.forgotten.lock().push(id.clone());
        Ok(())
    }
}

impl RecordingDataplane {
    fn rule(&self, id: &RuleId) -> Option<CompletedRule> {
        self.rules.lock().get(id).cloned()
    }

    fn forgot(&self, id: &RuleId) -> bool {
        self.forgotten.lock().contains(id)
    }
}

struct TestAgent {
    network_policies: mpsc::Sender<NetworkPolicyEvent>,
    address_groups: mpsc::Sender<AddressGroupEvent>,
    applied_to_groups: mpsc::Sender<AppliedToGroupEvent>,
    dataplane: RecordingDataplane,
    _tracing: tracing::subscriber::DefaultGuard,
}

impl TestAgent {
    fn spawn() -> Self {
        let _tracing = init_tracing();
        let (policies_tx, policies_rx) = mpsc::channel(16);
        let (address_tx, address_rx) = mpsc::channel(16);
        let (applied_tx, applied_rx) = mpsc::channel(16);

        let (cache, queue) = cache_with_queue(NodeInfo {
            name: "node-0".to_string(),
            ips: vec![ip("192.0.2.10")],
        });
        tokio::spawn(dispatch(
            cache.clone(),
            ResourceWatches {
                network_policies: policies_rx,
                address_groups: address_rx,
                applied_to_groups: applied_rx,
            },
        ));
        let dataplane = RecordingDataplane::default();
        tokio::spawn(reconcile(cache, queue, dataplane.clone()));

        Self {
            network_policies: policies_tx,
            address_groups: address_tx,
            applied_to_groups: applied_tx,
            dataplane,
            _tracing,
        }
    }

    /// Polls until `f` yields a value, failing the test after 5s.
    async fn eventually<T>(&self, f: impl Fn() -> Option<T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(v) = f() {
                    return v;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition must hold before timeout")
    }
}

fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .finish(),
    )
}

fn ip(addr: &str) -> IpAddr {
    addr.parse().unwrap()
}

fn mk_policy(uid: &str, applied_to: &[&str], address_groups: &[&str]) -> NetworkPolicy {
    NetworkPolicy {
        uid: uid.to_string(),
        name: format!("{uid}-name"),
        namespace: "ns-0".to_string(),
        rules: vec![NetworkPolicyRule {
            direction: Direction::In,
            from: NetworkPolicyPeer {
                address_groups: address_groups.iter().map(ToString::to_string).collect(),
                ip_blocks: vec![],
            },
            to: NetworkPolicyPeer::default(),
            services: vec![],
        }],
        applied_to_groups: applied_to.iter().map(ToString::to_string).collect(),
    }
}

fn mk_address_group(name: &str, addrs: &[&str]) -> AddressGroup {
    AddressGroup {
        name: name.to_string(),
        addresses: addrs.iter().map(|a| ip(a)).collect(),
    }
}

fn mk_applied_to_group(name: &str, pods: &[(&str, &str)]) -> AppliedToGroup {
    AppliedToGroup {
        name: name.to_string(),
        pods: pods
            .iter()
            .map(|(ns, name)| PodReference::new(ns, name))
            .collect(),
    }
}

fn only_rule_id(policy: &NetworkPolicy) -> RuleId {
    Rule::translate(policy, &policy.rules[0]).id
}

#[tokio::test]
async fn events_converge_on_the_dataplane() {
    let agent = TestAgent::spawn();
    let p1 = mk_policy("policy-1", &["applied-1"], &["group-1"]);
    let r1 = only_rule_id(&p1);

    agent
        .address_groups
        .send(AddressGroupEvent::Added(mk_address_group(
            "group-1",
            &["1.1.1.1"],
        )))
        .await
        .unwrap();
    agent
        .applied_to_groups
        .send(AppliedToGroupEvent::Added(mk_applied_to_group(
            "applied-1",
            &[("ns-1", "pod-1")],
        )))
        .await
        .unwrap();
    agent
        .network_policies
        .send(NetworkPolicyEvent::Added(p1.clone()))
        .await
        .unwrap();

    let installed = agent.eventually(|| agent.dataplane.rule(&r1)).await;
    assert_eq!(installed.from_addresses, btreeset![ip("1.1.1.1")]);
    assert_eq!(installed.pods, btreeset![PodReference::new("ns-1", "pod-1")]);

    // Growing the address group re-installs the rule with the new member.
    agent
        .address_groups
        .send(AddressGroupEvent::Patched(AddressGroupPatch {
            name: "group-1".to_string(),
            added: vec![ip("2.2.2.2")],
            removed: vec![],
        }))
        .await
        .unwrap();
    agent
        .eventually(|| {
            agent
                .dataplane
                .rule(&r1)
                .filter(|r| r.from_addresses.contains(&ip("2.2.2.2")))
        })
        .await;

    agent
        .network_policies
        .send(NetworkPolicyEvent::Deleted(p1))
        .await
        .unwrap();
    agent
        .eventually(|| agent.dataplane.forgot(&r1).then_some(()))
        .await;
    assert!(agent.dataplane.rule(&r1).is_none());
}

#[tokio::test]
async fn incomplete_rules_stay_off_the_dataplane() {
    let agent = TestAgent::spawn();
    let p1 = mk_policy("policy-1", &["applied-1"], &["group-1"]);
    let r1 = only_rule_id(&p1);

    agent
        .network_policies
        .send(NetworkPolicyEvent::Added(p1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(agent.dataplane.rule(&r1).is_none());

    // The rule completes once both groups resolve, in either order.
    agent
        .applied_to_groups
        .send(AppliedToGroupEvent::Added(mk_applied_to_group(
            "applied-1",
            &[("ns-1", "pod-1")],
        )))
        .await
        .unwrap();
    agent
        .address_groups
        .send(AddressGroupEvent::Added(mk_address_group(
            "group-1",
            &["1.1.1.1"],
        )))
        .await
        .unwrap();

    agent.eventually(|| agent.dataplane.rule(&r1)).await;
}

#[tokio::test]
async fn resync_tears_down_vanished_policies() {
    let agent = TestAgent::spawn();
    let p1 = mk_policy("policy-1", &[], &["group-1"]);
    let p2 = mk_policy("policy-2", &[], &["group-1"]);
    let r1 = only_rule_id(&p1);
    let r2 = only_rule_id(&p2);

    agent
        .address_groups
        .send(AddressGroupEvent::Added(mk_address_group(
            "group-1",
            &["1.1.1.1"],
        )))
        .await
        .unwrap();
    agent
        .network_policies
        .send(NetworkPolicyEvent::Added(p1))
        .await
        .unwrap();
    agent
        .network_policies
        .send(NetworkPolicyEvent::Added(p2.clone()))
        .await
        .unwrap();
    agent.eventually(|| agent.dataplane.rule(&r1)).await;
    agent.eventually(|| agent.dataplane.rule(&r2)).await;

    // The reconnected watch only knows policy-2.
    agent
        .network_policies
        .send(NetworkPolicyEvent::Resynced(vec![p2]))
        .await
        .unwrap();

    agent
        .eventually(|| agent.dataplane.forgot(&r1).then_some(()))
        .await;
    assert!(agent.dataplane.rule(&r2).is_some());
}
