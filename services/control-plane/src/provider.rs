//! Cloud provider interface and mock implementation.
//!
//! A provider performs the cloud-side half of every resource action. Each
//! call receives the running action's context so it can update the record
//! with provider-assigned fields, checkpoint long operations with a
//! [`Procedure`], and observe cancellation.
//!
//! A mock implementation is provided for testing and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herd_model::{Entrypoint, Kube, Node, Volume};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::actions::{ActionContext, ActionError, ActionResult, Procedure};

/// Cloud provider driver.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider key matched against `CloudAccount::provider`.
    fn name(&self) -> &str;

    async fn create_kube(&self, ctx: &ActionContext<Kube>) -> ActionResult<()>;

    async fn delete_kube(&self, ctx: &ActionContext<Kube>) -> ActionResult<()>;

    async fn create_node(&self, ctx: &ActionContext<Node>) -> ActionResult<()>;

    async fn delete_node(&self, ctx: &ActionContext<Node>) -> ActionResult<()>;

    async fn create_volume(&self, ctx: &ActionContext<Volume>) -> ActionResult<()>;

    async fn resize_volume(&self, ctx: &ActionContext<Volume>, size_gib: u32) -> ActionResult<()>;

    async fn delete_volume(&self, ctx: &ActionContext<Volume>) -> ActionResult<()>;

    async fn create_entrypoint(&self, ctx: &ActionContext<Entrypoint>) -> ActionResult<()>;

    async fn delete_entrypoint(&self, ctx: &ActionContext<Entrypoint>) -> ActionResult<()>;
}

/// Registered providers keyed by name.
#[derive(Clone, Default)]
pub struct Providers {
    by_name: HashMap<String, Arc<dyn Provider>>,
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.by_name.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.by_name.get(name).cloned()
    }
}

/// Interval at which the mock polls its simulated boot.
const MOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Provider calls made against a [`MockProvider`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub create_kube: u32,
    pub delete_kube: u32,
    pub create_node: u32,
    pub delete_node: u32,
    pub create_volume: u32,
    pub resize_volume: u32,
    pub delete_volume: u32,
    pub create_entrypoint: u32,
    pub delete_entrypoint: u32,
}

#[derive(Default)]
struct CallCounters {
    create_kube: AtomicU32,
    delete_kube: AtomicU32,
    create_node: AtomicU32,
    delete_node: AtomicU32,
    create_volume: AtomicU32,
    resize_volume: AtomicU32,
    delete_volume: AtomicU32,
    create_entrypoint: AtomicU32,
    delete_entrypoint: AtomicU32,
}

fn bump(counter: &AtomicU32) -> u32 {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

/// Mock provider for testing and development.
pub struct MockProvider {
    name: String,
    calls: CallCounters,
    /// Simulated time for a created kube or node to become ready.
    boot_delay: Duration,
    /// Whether every call should fail.
    fail_calls: bool,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: CallCounters::default(),
            boot_delay: Duration::ZERO,
            fail_calls: false,
        }
    }

    /// Create a mock provider that fails all calls.
    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            fail_calls: true,
            ..Self::new(name)
        }
    }

    pub fn with_boot_delay(mut self, boot_delay: Duration) -> Self {
        self.boot_delay = boot_delay;
        self
    }

    pub fn calls(&self) -> MockCalls {
        let c = &self.calls;
        let load = |counter: &AtomicU32| counter.load(Ordering::SeqCst);
        MockCalls {
            create_kube: load(&c.create_kube),
            delete_kube: load(&c.delete_kube),
            create_node: load(&c.create_node),
            delete_node: load(&c.delete_node),
            create_volume: load(&c.create_volume),
            resize_volume: load(&c.resize_volume),
            delete_volume: load(&c.delete_volume),
            create_entrypoint: load(&c.create_entrypoint),
            delete_entrypoint: load(&c.delete_entrypoint),
        }
    }

    fn check_failing(&self, call: &str) -> ActionResult<()> {
        if self.fail_calls {
            return Err(ActionError::provider(format!(
                "mock provider {} configured to fail {}",
                self.name, call
            )));
        }
        Ok(())
    }

    fn provider_id(&self, kind: &str, seq: u32) -> String {
        format!("{}-{}-{:06}", self.name, kind, seq)
    }
}

/// Wait out the simulated boot, giving up early if the action is cancelled.
async fn simulate_boot<R: herd_model::Resource>(
    ctx: &ActionContext<R>,
    desc: &str,
    boot_delay: Duration,
) -> ActionResult<()> {
    let started = Instant::now();
    ctx.cancellable_wait_for(desc, boot_delay + Duration::from_secs(60), MOCK_POLL_INTERVAL, || async move {
        Ok(started.elapsed() >= boot_delay)
    })
    .await
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_kube(&self, ctx: &ActionContext<Kube>) -> ActionResult<()> {
        let seq = bump(&self.calls.create_kube);
        self.check_failing("create_kube")?;

        let provider_id = self.provider_id("master", seq);
        let boot_delay = self.boot_delay;
        info!(kube_id = %ctx.entry().resource_id(), provider_id = %provider_id, "[MOCK] Creating kube");

        Procedure::new("create kube", ctx)
            .step("create master", move |ctx| async move {
                ctx.update(|kube| kube.master_public_ip = Some(format!("10.0.0.{}", seq % 250 + 1)))
                    .await;
                Ok(())
            })
            .step("wait for master", move |ctx| async move {
                simulate_boot(&ctx, "kube master", boot_delay).await
            })
            .step("mark ready", |ctx| async move {
                ctx.update(|kube| kube.ready = true).await;
                Ok(())
            })
            .run()
            .await
    }

    async fn delete_kube(&self, ctx: &ActionContext<Kube>) -> ActionResult<()> {
        bump(&self.calls.delete_kube);
        self.check_failing("delete_kube")?;
        info!(kube_id = %ctx.entry().resource_id(), "[MOCK] Deleting kube");
        Ok(())
    }

    async fn create_node(&self, ctx: &ActionContext<Node>) -> ActionResult<()> {
        let seq = bump(&self.calls.create_node);
        self.check_failing("create_node")?;

        let provider_id = self.provider_id("node", seq);
        let boot_delay = self.boot_delay;
        let node = ctx.resource().await;
        info!(
            node_id = %node.id,
            kube_id = %node.kube_id,
            size = %node.size,
            provider_id = %provider_id,
            "[MOCK] Creating node"
        );

        Procedure::new("create node", ctx)
            .step("create instance", move |ctx| async move {
                ctx.update(|node| {
                    node.name = format!("node-{:06}", seq);
                    node.provider_id = provider_id;
                    node.provider_creation_timestamp = chrono::Utc::now();
                })
                .await;
                Ok(())
            })
            .step("wait for instance", move |ctx| async move {
                simulate_boot(&ctx, "node instance", boot_delay).await
            })
            .step("mark ready", |ctx| async move {
                ctx.update(|node| node.ready = true).await;
                Ok(())
            })
            .run()
            .await
    }

    async fn delete_node(&self, ctx: &ActionContext<Node>) -> ActionResult<()> {
        bump(&self.calls.delete_node);
        self.check_failing("delete_node")?;
        let node = ctx.resource().await;
        info!(node_id = %node.id, provider_id = %node.provider_id, "[MOCK] Deleting node");
        Ok(())
    }

    async fn create_volume(&self, ctx: &ActionContext<Volume>) -> ActionResult<()> {
        let seq = bump(&self.calls.create_volume);
        self.check_failing("create_volume")?;

        let provider_id = self.provider_id("vol", seq);
        debug!(volume_id = %ctx.entry().resource_id(), provider_id = %provider_id, "[MOCK] Creating volume");
        ctx.update(|volume| volume.provider_id = provider_id).await;
        ctx.save().await
    }

    async fn resize_volume(&self, ctx: &ActionContext<Volume>, size_gib: u32) -> ActionResult<()> {
        bump(&self.calls.resize_volume);
        self.check_failing("resize_volume")?;
        debug!(volume_id = %ctx.entry().resource_id(), size_gib, "[MOCK] Resizing volume");
        ctx.update(|volume| volume.size_gib = size_gib).await;
        ctx.save().await
    }

    async fn delete_volume(&self, ctx: &ActionContext<Volume>) -> ActionResult<()> {
        bump(&self.calls.delete_volume);
        self.check_failing("delete_volume")?;
        debug!(volume_id = %ctx.entry().resource_id(), "[MOCK] Deleting volume");
        Ok(())
    }

    async fn create_entrypoint(&self, ctx: &ActionContext<Entrypoint>) -> ActionResult<()> {
        let seq = bump(&self.calls.create_entrypoint);
        self.check_failing("create_entrypoint")?;

        let provider_id = self.provider_id("lb", seq);
        debug!(entrypoint_id = %ctx.entry().resource_id(), provider_id = %provider_id, "[MOCK] Creating entrypoint");
        ctx.update(|entrypoint| {
            entrypoint.address = Some(format!("{}.lb.{}.example", entrypoint.name, self.name));
            entrypoint.provider_id = provider_id;
        })
        .await;
        ctx.save().await
    }

    async fn delete_entrypoint(&self, ctx: &ActionContext<Entrypoint>) -> ActionResult<()> {
        bump(&self.calls.delete_entrypoint);
        self.check_failing("delete_entrypoint")?;
        debug!(entrypoint_id = %ctx.entry().resource_id(), "[MOCK] Deleting entrypoint");
        Ok(())
    }
}
