use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// The traffic direction a rule applies to, relative to the pods it is
/// applied to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

/// A (protocol, port) pair a rule matches. An unset port matches all ports
/// of the protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    pub protocol: Protocol,
    pub port: Option<u16>,
}

/// The source (for inbound rules) or destination (for outbound rules) a
/// rule matches: named address groups resolved by the controller, plus
/// literal CIDRs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicyPeer {
    pub address_groups: Vec<String>,
    pub ip_blocks: Vec<IpNet>,
}

/// A single rule of a `NetworkPolicy`, as sent by the controller.
///
/// Only `from` is meaningful for inbound rules and only `to` for outbound
/// ones; the other peer is left empty by the controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicyRule {
    pub direction: Direction,
    #[serde(default)]
    pub from: NetworkPolicyPeer,
    #[serde(default)]
    pub to: NetworkPolicyPeer,
    #[serde(default)]
    pub services: Vec<Service>,
}

/// The node-relevant projection of a NetworkPolicy object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    /// Controller-assigned identity; stable across updates of the object.
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub rules: Vec<NetworkPolicyRule>,
    /// Names of the applied-to groups every rule of this policy applies to.
    pub applied_to_groups: Vec<String>,
}
