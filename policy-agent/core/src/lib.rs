//! Domain types shared by the policy agent.
//!
//! The central controller distills `NetworkPolicy`, `AddressGroup`, and
//! `AppliedToGroup` objects down to the subset of state each node needs.
//! This crate models those objects and the per-rule view the agent derives
//! from them.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod groups;
mod policy;
mod rule;

pub use self::{
    groups::{AddressGroup, AddressGroupPatch, AppliedToGroup, AppliedToGroupPatch, PodReference},
    policy::{Direction, NetworkPolicy, NetworkPolicyPeer, NetworkPolicyRule, Protocol, Service},
    rule::{CompletedRule, Rule, RuleId},
};
pub use ipnet::IpNet;

use std::net::IpAddr;

/// Identity of the node this agent runs on.
///
/// The addresses are carried through to consumers of the rule cache; they
/// never affect how rules resolve.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub ips: Vec<IpAddr>,
}
