//! End-to-end stack tests against the sim engine
//!
//! Verifies that the built-in AKS stack wires its declarations through the
//! deferred value graph: provisioning order follows dependency edges, engine
//! requests carry the resolved attributes, and failures surface at finish
//! with the chain back to the originating resource.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stratus::engine::SimEngine;
use stratus::{stack, Deployment, StackConfig, StratusError};

fn test_config() -> StackConfig {
    StackConfig::new()
        .with("subscriptionid", "sub-e2e")
        .with("subnetcidr", "10.0.0.0/24")
        .with("vnetcidr", "10.0.0.0/16")
}

#[tokio::test]
async fn stack_resolves_oidc_export() {
    let engine = Arc::new(SimEngine::new().with_subscription("sub-e2e"));
    let deployment = Deployment::new(engine.clone());

    stack::build_aks_stack(&deployment, &test_config()).unwrap();
    let outputs = deployment.finish(Duration::from_secs(10)).await.unwrap();

    let oidc = outputs["oidc"].as_str().unwrap();
    assert!(oidc.starts_with("https://"));
    assert!(oidc.contains("oic.prod-aks.azure.com"));
}

#[tokio::test]
async fn provisioning_order_follows_dependency_edges() {
    let engine = Arc::new(SimEngine::new());
    let deployment = Deployment::new(engine.clone());

    stack::build_aks_stack(&deployment, &test_config()).unwrap();
    deployment.finish(Duration::from_secs(10)).await.unwrap();

    let created = engine.created_names();
    assert_eq!(created.len(), 6);

    let pos = |name: &str| {
        created
            .iter()
            .position(|n| n == name)
            .unwrap_or_else(|| panic!("{} was never created", name))
    };

    assert!(pos("pk-aks-test") < pos("vnet"));
    assert!(pos("vnet") < pos("subnet"));
    assert!(pos("pk-aks-test") < pos("pk-aks-test-useridentity"));
    assert!(pos("subnet") < pos("pk-aks-test-roleassignment"));
    assert!(pos("pk-aks-test-useridentity") < pos("pk-aks-test-roleassignment"));
    assert!(pos("subnet") < pos("pk-aks-test-cluster"));

    // read-after-create comes last
    let calls = engine.calls();
    let read = calls.last().unwrap();
    assert_eq!(read.request.name, "pk-aks-test-cluster-props");
}

#[tokio::test]
async fn cluster_request_carries_resolved_attributes() {
    let engine = Arc::new(SimEngine::new());
    let deployment = Deployment::new(engine.clone());

    stack::build_aks_stack(&deployment, &test_config()).unwrap();
    deployment.finish(Duration::from_secs(10)).await.unwrap();

    let calls = engine.calls();
    let cluster = calls
        .iter()
        .find(|c| c.request.name == "pk-aks-test-cluster")
        .expect("cluster create call");
    let attrs = &cluster.request.attributes;

    // autoscaler profile carried through verbatim
    assert_eq!(attrs["autoScalerProfile"]["expander"], json!("random"));
    assert_eq!(
        attrs["autoScalerProfile"]["scaleDownUtilizationThreshold"],
        json!("0.5")
    );
    assert_eq!(attrs["kubernetesVersion"], json!("1.27.3"));
    assert_eq!(attrs["sku"], json!({"name": "Base", "tier": "Standard"}));

    // deferred subnet ID resolved in place inside the node pool
    let subnet_id = attrs["agentPoolProfiles"][0]["vnetSubnetId"].as_str().unwrap();
    assert!(subnet_id.contains("/subnets/subnet-"));

    // identity wiring keyed by the resolved identity resource ID
    let identities = attrs["identity"]["userAssignedIdentities"].as_object().unwrap();
    assert_eq!(identities.len(), 1);
    let key = identities.keys().next().unwrap();
    assert!(key.contains("/userAssignedIdentities/pk-aks-test-useridentity-"));

    // dnsPrefix chained from the resource group's physical name
    let dns = attrs["dnsPrefix"].as_str().unwrap();
    assert!(dns.starts_with("pk-aks-test-"));
}

#[tokio::test]
async fn role_assignment_scope_is_subnet_id() {
    let engine = Arc::new(SimEngine::new());
    let deployment = Deployment::new(engine.clone());

    stack::build_aks_stack(&deployment, &test_config()).unwrap();
    deployment.finish(Duration::from_secs(10)).await.unwrap();

    let calls = engine.calls();
    let role = calls
        .iter()
        .find(|c| c.request.name == "pk-aks-test-roleassignment")
        .expect("role assignment create call");

    let scope = role.request.attributes["scope"].as_str().unwrap();
    assert!(scope.contains("/subnets/subnet-"));
    assert!(role.request.attributes["principalId"]
        .as_str()
        .unwrap()
        .starts_with("principal-"));
    assert_eq!(
        role.request.attributes["roleDefinitionId"],
        json!(
            "/subscriptions/sub-e2e/providers/Microsoft.Authorization/roleDefinitions/4d97b98b-1d4f-4787-a291-c67834d212e7"
        )
    );
}

#[tokio::test]
async fn subnet_failure_fails_export_with_chain() {
    let engine = Arc::new(SimEngine::new());
    engine.fail_next("subnet", "address space exhausted");
    let deployment = Deployment::new(engine.clone());

    stack::build_aks_stack(&deployment, &test_config()).unwrap();
    let err = deployment.finish(Duration::from_secs(10)).await.unwrap_err();

    match err {
        StratusError::ExportFailed { key, fault } => {
            assert_eq!(key, "oidc");
            assert!(fault.message().contains("address space exhausted"));
            assert_eq!(fault.origin(), "network:Subnet/subnet");
            assert!(fault
                .chain()
                .iter()
                .any(|l| l.contains("pk-aks-test-cluster")));
        }
        other => panic!("expected ExportFailed, got {:?}", other),
    }

    // the cluster was never sent to the engine
    assert!(!engine.created_names().iter().any(|n| n == "pk-aks-test-cluster"));
}

#[tokio::test]
async fn missing_config_aborts_before_provisioning() {
    let engine = Arc::new(SimEngine::new());
    let deployment = Deployment::new(engine.clone());

    let config = StackConfig::new().with("subscriptionid", "sub-e2e");
    let err = stack::build_aks_stack(&deployment, &config).unwrap_err();

    assert!(matches!(err, StratusError::MissingConfig { .. }));
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn out_of_order_completion_still_respects_edges() {
    let engine = Arc::new(SimEngine::new());
    // identity finishes long after the vnet chain
    engine.set_delay("pk-aks-test-useridentity", Duration::from_millis(80));
    let deployment = Deployment::new(engine.clone());

    stack::build_aks_stack(&deployment, &test_config()).unwrap();
    let outputs = deployment.finish(Duration::from_secs(10)).await.unwrap();

    assert!(outputs.contains_key("oidc"));
    let created = engine.created_names();
    let pos = |name: &str| created.iter().position(|n| n == name).unwrap();
    // role assignment still waits for the slow identity
    assert!(pos("pk-aks-test-useridentity") < pos("pk-aks-test-roleassignment"));
}
