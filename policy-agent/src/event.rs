use policy_agent_core::{
    AddressGroup, AddressGroupPatch, AppliedToGroup, AppliedToGroupPatch, NetworkPolicy,
};
use tokio::sync::mpsc;

/// A NetworkPolicy change observed by the watch client.
///
/// `Resynced` carries the controller's full state after a reconnect, when
/// intermediate deltas may have been lost.
#[derive(Clone, Debug)]
pub enum NetworkPolicyEvent {
    Added(NetworkPolicy),
    Updated(NetworkPolicy),
    Deleted(NetworkPolicy),
    Resynced(Vec<NetworkPolicy>),
}

/// An AddressGroup change observed by the watch client.
#[derive(Clone, Debug)]
pub enum AddressGroupEvent {
    Added(AddressGroup),
    Patched(AddressGroupPatch),
    Deleted(String),
    Resynced(Vec<AddressGroup>),
}

/// An AppliedToGroup change observed by the watch client.
#[derive(Clone, Debug)]
pub enum AppliedToGroupEvent {
    Added(AppliedToGroup),
    Patched(AppliedToGroupPatch),
    Deleted(String),
    Resynced(Vec<AppliedToGroup>),
}

/// The per-kind event streams the watch client feeds the dispatcher.
pub struct ResourceWatches {
    pub network_policies: mpsc::Receiver<NetworkPolicyEvent>,
    pub address_groups: mpsc::Receiver<AddressGroupEvent>,
    pub applied_to_groups: mpsc::Receiver<AppliedToGroupEvent>,
}
