//! Simulated engine for tests and dry runs
//!
//! Synthesizes plausible Azure-shaped IDs and output attributes without
//! touching a real control plane. Records every request for assertions and
//! supports per-resource failure injection and artificial latency, so tests
//! can drive settlement events in any order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{Engine, ResourceRequest, ResourceState};

/// Which operation a recorded call performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
}

/// One recorded engine call.
#[derive(Debug, Clone)]
pub struct SimCall {
    pub operation: Operation,
    pub request: ResourceRequest,
}

/// In-process engine with configurable behavior.
pub struct SimEngine {
    subscription: String,
    region: String,
    /// Every call made, in completion-start order (for assertions).
    calls: Arc<Mutex<Vec<SimCall>>>,
    /// Logical name -> error message for the next call on that resource.
    failures: Arc<Mutex<HashMap<String, String>>>,
    /// Logical name -> artificial latency before the call completes.
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    sequence: AtomicU64,
}

impl SimEngine {
    pub fn new() -> Self {
        Self {
            subscription: "00000000-0000-0000-0000-000000000000".to_string(),
            region: "eastus".to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            delays: Arc::new(Mutex::new(HashMap::new())),
            sequence: AtomicU64::new(1),
        }
    }

    /// Set the subscription ID used when shaping resource IDs.
    pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscription = subscription.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Fail the next call on the resource with the given logical name.
    pub fn fail_next(&self, name: impl Into<String>, message: impl Into<String>) {
        self.failures
            .lock()
            .unwrap()
            .insert(name.into(), message.into());
    }

    /// Delay calls on the resource with the given logical name.
    pub fn set_delay(&self, name: impl Into<String>, delay: Duration) {
        self.delays.lock().unwrap().insert(name.into(), delay);
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<SimCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Logical names of created resources, in call order.
    pub fn created_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == Operation::Create)
            .map(|c| c.request.name.clone())
            .collect()
    }

    async fn pace(&self, request: &ResourceRequest) -> Result<()> {
        let delay = self.delays.lock().unwrap().get(&request.name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().unwrap().remove(&request.name);
        if let Some(message) = failure {
            bail!("{}", message);
        }
        Ok(())
    }

    fn shape_id(&self, kind: &str, physical: &str, attrs: &Value) -> String {
        let rg = attrs
            .get("resourceGroupName")
            .and_then(Value::as_str)
            .unwrap_or("unknown-rg");
        match kind {
            "resources:ResourceGroup" => {
                format!("/subscriptions/{}/resourceGroups/{}", self.subscription, physical)
            }
            "network:VirtualNetwork" => format!(
                "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}",
                self.subscription, rg, physical
            ),
            "network:Subnet" => {
                let vnet = attrs
                    .get("virtualNetworkName")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown-vnet");
                format!(
                    "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}/subnets/{}",
                    self.subscription, rg, vnet, physical
                )
            }
            "managedidentity:UserAssignedIdentity" => format!(
                "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ManagedIdentity/userAssignedIdentities/{}",
                self.subscription, rg, physical
            ),
            "authorization:RoleAssignment" => {
                let scope = attrs.get("scope").and_then(Value::as_str).unwrap_or("");
                format!(
                    "{}/providers/Microsoft.Authorization/roleAssignments/{}",
                    scope, physical
                )
            }
            "containerservice:ManagedCluster" => format!(
                "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerService/managedClusters/{}",
                self.subscription, rg, physical
            ),
            _ => format!("/sim/{}/{}", kind, physical),
        }
    }

    fn issuer_url(&self, seq: u64) -> String {
        format!(
            "https://{}.oic.prod-aks.azure.com/{:08x}-0000-0000-0000-000000000000/{:08x}/",
            self.region, seq, seq
        )
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for SimEngine {
    fn name(&self) -> &str {
        "sim"
    }

    async fn create(&self, request: ResourceRequest) -> Result<ResourceState> {
        self.calls.lock().unwrap().push(SimCall {
            operation: Operation::Create,
            request: request.clone(),
        });
        self.pace(&request).await?;

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let physical = format!("{}-{:06x}", request.name, seq);
        let id = self.shape_id(&request.kind, &physical, &request.attributes);

        let mut outputs = match &request.attributes {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        outputs.insert("id".to_string(), json!(id));
        outputs.insert("name".to_string(), json!(physical.clone()));

        match request.kind.as_str() {
            "managedidentity:UserAssignedIdentity" => {
                outputs.insert("principalId".to_string(), json!(format!("principal-{:08x}", seq)));
                outputs.insert("clientId".to_string(), json!(format!("client-{:08x}", seq)));
            }
            "containerservice:ManagedCluster" => {
                let oidc_enabled = request
                    .attributes
                    .get("oidcIssuerProfile")
                    .and_then(|p| p.get("enabled"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if oidc_enabled {
                    outputs.insert(
                        "oidcIssuerProfile".to_string(),
                        json!({"enabled": true, "issuerUrl": self.issuer_url(seq)}),
                    );
                }
            }
            _ => {}
        }

        Ok(ResourceState {
            kind: request.kind,
            name: physical,
            attributes: Value::Object(outputs),
        })
    }

    async fn read(&self, request: ResourceRequest) -> Result<ResourceState> {
        self.calls.lock().unwrap().push(SimCall {
            operation: Operation::Read,
            request: request.clone(),
        });
        self.pace(&request).await?;

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let physical = request
            .attributes
            .get("resourceName")
            .and_then(Value::as_str)
            .unwrap_or(&request.name)
            .to_string();
        let id = self.shape_id(&request.kind, &physical, &request.attributes);

        let mut outputs = match &request.attributes {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        outputs.insert("id".to_string(), json!(id));
        outputs.insert("name".to_string(), json!(physical.clone()));
        if request.kind == "containerservice:ManagedCluster" {
            outputs.insert(
                "oidcIssuerProfile".to_string(),
                json!({"enabled": true, "issuerUrl": self.issuer_url(seq)}),
            );
        }

        Ok(ResourceState {
            kind: request.kind,
            name: physical,
            attributes: Value::Object(outputs),
        })
    }
}
