use serde::{Deserialize, Serialize};
use std::{fmt, net::IpAddr};

/// Identifies a pod by name within a namespace.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PodReference {
    pub namespace: String,
    pub name: String,
}

impl PodReference {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for PodReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A named set of IP endpoints referenced by policy peers.
///
/// Membership is authoritative: an add replaces whatever the agent knew
/// before, and an empty group is a valid, known group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressGroup {
    pub name: String,
    pub addresses: Vec<IpAddr>,
}

/// A named set of pods a policy applies to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedToGroup {
    pub name: String,
    pub pods: Vec<PodReference>,
}

/// An incremental membership delta for an address group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressGroupPatch {
    pub name: String,
    #[serde(default)]
    pub added: Vec<IpAddr>,
    #[serde(default)]
    pub removed: Vec<IpAddr>,
}

/// An incremental membership delta for an applied-to group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedToGroupPatch {
    pub name: String,
    #[serde(default)]
    pub added: Vec<PodReference>,
    #[serde(default)]
    pub removed: Vec<PodReference>,
}
