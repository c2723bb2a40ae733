//! Built-in AKS stack program
//!
//! Declares a resource group, a virtual network and subnet, a user-assigned
//! managed identity, a role assignment granting the identity network access
//! on the subnet, and a managed Kubernetes cluster with a full autoscaler
//! profile, then exports the cluster's OIDC issuer URL.
//!
//! Outputs chain through the deferred value graph: nothing here blocks, and
//! the actual provisioning order falls out of the dependency edges.

use serde_json::json;

use crate::attrs::{AttrValue, Attrs};
use crate::config::StackConfig;
use crate::coordinator::Deployment;
use crate::error::StratusError;

pub const STACK_NAME: &str = "pk-aks-test";

/// Config keys the stack program cannot run without.
pub const REQUIRED_KEYS: [&str; 3] = ["subscriptionid", "subnetcidr", "vnetcidr"];

/// Network Contributor built-in role.
const NETWORK_CONTRIBUTOR_ROLE: &str = "4d97b98b-1d4f-4787-a291-c67834d212e7";

/// Check required config keys without declaring anything.
pub fn validate_config(config: &StackConfig) -> Result<(), StratusError> {
    for key in REQUIRED_KEYS {
        config.require(key)?;
    }
    Ok(())
}

/// Declare the whole stack against `deployment` and register its exports.
///
/// Returns once every declaration is registered; provisioning continues in
/// the background and is driven to completion by `Deployment::finish`.
pub fn build_aks_stack(
    deployment: &Deployment,
    config: &StackConfig,
) -> Result<(), StratusError> {
    let subscription_id = config.require("subscriptionid")?;
    let subnet_cidr = config.require("subnetcidr")?;
    let vnet_cidr = config.require("vnetcidr")?;

    let resource_group = deployment.declare("resources:ResourceGroup", STACK_NAME, Attrs::new());
    let rg_name = resource_group.attr("name");

    let vnet = deployment.declare(
        "network:VirtualNetwork",
        "vnet",
        Attrs::new()
            .set("addressSpace", json!({ "addressPrefixes": [vnet_cidr] }))
            .set("resourceGroupName", &rg_name),
    );

    let subnet = deployment.declare(
        "network:Subnet",
        "subnet",
        Attrs::new()
            .set("virtualNetworkName", vnet.attr("name"))
            .set("resourceGroupName", &rg_name)
            .set("addressPrefix", json!(subnet_cidr)),
    );

    let cluster_identity = deployment.declare(
        "managedidentity:UserAssignedIdentity",
        &format!("{STACK_NAME}-useridentity"),
        Attrs::new().set("resourceGroupName", &rg_name),
    );

    let _subnet_role_assignment = deployment.declare(
        "authorization:RoleAssignment",
        &format!("{STACK_NAME}-roleassignment"),
        Attrs::new()
            .set("principalId", cluster_identity.attr("principalId"))
            .set("principalType", json!("ServicePrincipal"))
            .set("scope", subnet.attr("id"))
            .set(
                "roleDefinitionId",
                json!(format!(
                    "/subscriptions/{subscription_id}/providers/Microsoft.Authorization/roleDefinitions/{NETWORK_CONTRIBUTOR_ROLE}"
                )),
            ),
    );

    // { <identity id>: {} }, the shape the cluster identity wiring expects
    let identity_map = cluster_identity.attr("id").map_value(
        format!("{STACK_NAME}-cluster.userAssignedIdentities"),
        |id| {
            let key = id
                .as_str()
                .ok_or_else(|| "identity id is not a string".to_string())?
                .to_string();
            Ok(json!({ key: {} }))
        },
    );

    let cluster = deployment.declare(
        "containerservice:ManagedCluster",
        &format!("{STACK_NAME}-cluster"),
        Attrs::new()
            .set("resourceGroupName", &rg_name)
            .set(
                "autoScalerProfile",
                json!({
                    "balanceSimilarNodeGroups": "true",
                    "expander": "random",
                    "maxEmptyBulkDelete": "10",
                    "maxGracefulTerminationSec": "600",
                    "maxNodeProvisionTime": "15m",
                    "maxTotalUnreadyPercentage": "45",
                    "newPodScaleUpDelay": "0s",
                    "okTotalUnreadyCount": "3",
                    "scaleDownDelayAfterAdd": "10m",
                    "scaleDownDelayAfterDelete": "10s",
                    "scaleDownDelayAfterFailure": "3m",
                    "scaleDownUnneededTime": "10m",
                    "scaleDownUnreadyTime": "20m",
                    "scaleDownUtilizationThreshold": "0.5",
                    "scanInterval": "10s",
                    "skipNodesWithLocalStorage": "true",
                    "skipNodesWithSystemPods": "false",
                }),
            )
            .set(
                "agentPoolProfiles",
                AttrValue::List(vec![AttrValue::Map(vec![
                    ("count".to_string(), AttrValue::Literal(json!(2))),
                    ("maxPods".to_string(), AttrValue::Literal(json!(50))),
                    ("mode".to_string(), AttrValue::Literal(json!("System"))),
                    ("osDiskSizeGB".to_string(), AttrValue::Literal(json!(30))),
                    ("osType".to_string(), AttrValue::Literal(json!("Linux"))),
                    (
                        "type".to_string(),
                        AttrValue::Literal(json!("VirtualMachineScaleSets")),
                    ),
                    (
                        "vmSize".to_string(),
                        AttrValue::Literal(json!("Standard_DS3_v2")),
                    ),
                    (
                        "vnetSubnetId".to_string(),
                        AttrValue::Deferred(subnet.attr("id")),
                    ),
                    ("name".to_string(), AttrValue::Literal(json!("nodepool"))),
                ])]),
            )
            .set("dnsPrefix", &rg_name)
            .set("enableRbac", json!(true))
            .set("kubernetesVersion", json!("1.27.3"))
            .set(
                "identity",
                AttrValue::Map(vec![
                    ("type".to_string(), AttrValue::Literal(json!("UserAssigned"))),
                    (
                        "userAssignedIdentities".to_string(),
                        AttrValue::Deferred(identity_map),
                    ),
                ]),
            )
            .set("servicePrincipalProfile", json!({ "clientId": "msi" }))
            .set("oidcIssuerProfile", json!({ "enabled": true }))
            .set("sku", json!({ "name": "Base", "tier": "Standard" })),
    );

    // Read back the cluster to extract the issuer URL, ordered after the
    // create by joining on both names.
    let cluster_props = deployment.read(
        "containerservice:ManagedCluster",
        &format!("{STACK_NAME}-cluster-props"),
        Attrs::new()
            .set("resourceGroupName", &rg_name)
            .set("resourceName", cluster.attr("name")),
    );

    deployment.export("oidc", &cluster_props.attr("oidcIssuerProfile.issuerUrl"));

    Ok(())
}
