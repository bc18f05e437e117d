//! Persisted records: cloud accounts, kubes, nodes, volumes, entrypoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::{new_resource_id, ActionStatus, Resource};

/// A compute unit offered by a cloud provider.
///
/// A provider's configured list of sizes is ordered ascending by cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSize {
    pub name: String,
    pub cpu_cores: f64,
    pub ram_gib: f64,
}

impl NodeSize {
    pub fn new(name: impl Into<String>, cpu_cores: f64, ram_gib: f64) -> Self {
        Self {
            name: name.into(),
            cpu_cores,
            ram_gib,
        }
    }

    /// Returns true if this size covers the given usage.
    pub fn fits(&self, cpu_cores: f64, ram_gib: f64) -> bool {
        self.cpu_cores >= cpu_cores && self.ram_gib >= ram_gib
    }
}

/// Credentials scope for one cloud provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudAccount {
    pub id: String,
    pub name: String,
    /// Provider key, e.g. `"aws"` or `"digitalocean"`.
    pub provider: String,
}

impl CloudAccount {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: new_resource_id(),
            name: name.into(),
            provider: provider.into(),
        }
    }
}

/// A managed Kubernetes cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kube {
    pub id: String,
    pub name: String,
    pub cloud_account_id: String,
    #[serde(default)]
    pub ready: bool,
    /// Allowed node size names; capacity scaling only uses these.
    pub node_sizes: Vec<String>,
    #[serde(default)]
    pub master_public_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActionStatus>,
}

impl Kube {
    pub fn new(
        name: impl Into<String>,
        cloud_account_id: impl Into<String>,
        node_sizes: Vec<String>,
    ) -> Self {
        Self {
            id: new_resource_id(),
            name: name.into(),
            cloud_account_id: cloud_account_id.into(),
            ready: false,
            node_sizes,
            master_public_ip: None,
            status: None,
        }
    }
}

/// A compute node belonging to a kube.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kube_id: String,
    /// Kubernetes node name, known once the provider has created it.
    #[serde(default)]
    pub name: String,
    pub size: String,
    #[serde(default)]
    pub provider_id: String,
    pub provider_creation_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActionStatus>,
}

impl Node {
    pub fn new(kube_id: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            id: new_resource_id(),
            kube_id: kube_id.into(),
            name: String::new(),
            size: size.into(),
            provider_id: String::new(),
            provider_creation_timestamp: Utc::now(),
            ready: false,
            status: None,
        }
    }
}

/// A block-storage volume attached within a kube.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub kube_id: String,
    pub name: String,
    pub size_gib: u32,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActionStatus>,
}

impl Volume {
    pub fn new(kube_id: impl Into<String>, name: impl Into<String>, size_gib: u32) -> Self {
        Self {
            id: new_resource_id(),
            kube_id: kube_id.into(),
            name: name.into(),
            size_gib,
            provider_id: String::new(),
            status: None,
        }
    }
}

/// A provider load balancer fronting a kube.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entrypoint {
    pub id: String,
    pub kube_id: String,
    pub name: String,
    /// Public address, known once the provider has created it.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActionStatus>,
}

impl Entrypoint {
    pub fn new(kube_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: new_resource_id(),
            kube_id: kube_id.into(),
            name: name.into(),
            address: None,
            provider_id: String::new(),
            status: None,
        }
    }
}

macro_rules! impl_resource {
    ($ty:ty, $kind:literal) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn status(&self) -> Option<&ActionStatus> {
                self.status.as_ref()
            }

            fn set_status(&mut self, status: Option<ActionStatus>) {
                self.status = status;
            }
        }
    };
}

impl_resource!(Kube, "kube");
impl_resource!(Node, "node");
impl_resource!(Volume, "volume");
impl_resource!(Entrypoint, "entrypoint");

impl Resource for CloudAccount {
    const KIND: &'static str = "cloud_account";

    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> Option<&ActionStatus> {
        None
    }

    fn set_status(&mut self, _status: Option<ActionStatus>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_size_fits() {
        let size = NodeSize::new("2gb", 2.0, 2.0);
        assert!(size.fits(2.0, 2.0));
        assert!(size.fits(1.5, 0.5));
        assert!(!size.fits(2.5, 1.0));
        assert!(!size.fits(1.0, 2.1));
    }

    #[test]
    fn test_resource_ids_are_unique() {
        let a = Node::new("kube", "2gb");
        let b = Node::new("kube", "2gb");
        assert_ne!(a.id(), b.id());
        assert_eq!(<Node as Resource>::KIND, "node");
    }

    #[test]
    fn test_node_roundtrips_with_status() {
        let mut node = Node::new("kube-1", "4gb");
        node.set_status(Some(ActionStatus::new("provisioning", 1)));

        let json = serde_json::to_value(&node).unwrap();
        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back.status().unwrap().description, "provisioning");
        assert_eq!(back.size, "4gb");
    }
}
