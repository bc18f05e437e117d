//! Workload descriptors observed inside a kube.
//!
//! These mirror the subset of the Kubernetes pod and event schema the
//! capacity scheduler consumes.

use serde::{Deserialize, Serialize};

use crate::error::UnitError;
use crate::units::{Bytes, Cores};

/// Pod lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// A CPU/memory pair as written in a container spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl ResourceValues {
    pub fn new(cpu: impl Into<String>, memory: impl Into<String>) -> Self {
        Self {
            cpu: Some(cpu.into()),
            memory: Some(memory.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: Option<ResourceValues>,
    #[serde(default)]
    pub limits: Option<ResourceValues>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

impl Container {
    /// CPU quantity to size a node for: the limit if set, else the request.
    fn sizing_cpu(&self) -> Option<&str> {
        let limits = self.resources.limits.as_ref().and_then(|v| v.cpu.as_deref());
        let requests = self.resources.requests.as_ref().and_then(|v| v.cpu.as_deref());
        limits.or(requests)
    }

    /// Memory quantity to size a node for: the limit if set, else the request.
    fn sizing_memory(&self) -> Option<&str> {
        let limits = self.resources.limits.as_ref().and_then(|v| v.memory.as_deref());
        let requests = self
            .resources
            .requests
            .as_ref()
            .and_then(|v| v.memory.as_deref());
        limits.or(requests)
    }

    /// Returns true if the container requests a non-zero CPU or memory amount.
    pub fn reserves_resources(&self) -> Result<bool, UnitError> {
        let Some(requests) = &self.resources.requests else {
            return Ok(false);
        };
        if let Some(cpu) = &requests.cpu {
            if !Cores::parse(cpu)?.is_zero() {
                return Ok(true);
            }
        }
        if let Some(memory) = &requests.memory {
            if !Bytes::parse(memory)?.is_zero() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Backing source of a pod volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeSource {
    AwsElasticBlockStore,
    FlexVolume,
    EmptyDir,
    ConfigMap,
    Secret,
    Other,
}

impl VolumeSource {
    /// Returns true for sources that attach a block device to the host node.
    pub fn is_block_device(&self) -> bool {
        matches!(self, Self::AwsElasticBlockStore | Self::FlexVolume)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodVolume {
    pub name: String,
    pub source: VolumeSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub node_name: Option<String>,
    pub phase: PodPhase,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub volumes: Vec<PodVolume>,
}

impl Pod {
    pub fn new(name: impl Into<String>, phase: PodPhase) -> Self {
        Self {
            name: name.into(),
            namespace: "default".to_string(),
            node_name: None,
            phase,
            containers: Vec::new(),
            volumes: Vec::new(),
        }
    }

    /// Returns true if any container requests non-zero CPU or memory.
    pub fn reserves_resources(&self) -> Result<bool, UnitError> {
        for container in &self.containers {
            if container.reserves_resources()? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// A scheduling event reported for some object in the kube.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Name of the object the event is about.
    pub involved_object: String,
    #[serde(default)]
    pub reason: String,
    pub message: String,
}

/// The resources a pending pod needs from a node.
///
/// CPU and RAM are summed over containers using limits where set and
/// requests otherwise, so a node sized for the demand can satisfy the
/// workload's declared ceiling rather than its floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodDemand {
    pub name: String,
    pub cpu_cores: f64,
    pub ram_gib: f64,
    /// Number of block-storage volumes the pod attaches.
    pub volumes: usize,
}

impl PodDemand {
    pub fn new(name: impl Into<String>, cpu_cores: f64, ram_gib: f64, volumes: usize) -> Self {
        Self {
            name: name.into(),
            cpu_cores,
            ram_gib,
            volumes,
        }
    }

    pub fn from_pod(pod: &Pod) -> Result<Self, UnitError> {
        let mut cpu_cores = 0.0;
        let mut ram_gib = 0.0;

        for container in &pod.containers {
            if let Some(cpu) = container.sizing_cpu() {
                cpu_cores += Cores::parse(cpu)?.cores();
            }
            if let Some(memory) = container.sizing_memory() {
                ram_gib += Bytes::parse(memory)?.gibibytes();
            }
        }

        let volumes = pod
            .volumes
            .iter()
            .filter(|v| v.source.is_block_device())
            .count();

        Ok(Self {
            name: pod.name.clone(),
            cpu_cores,
            ram_gib,
            volumes,
        })
    }
}
