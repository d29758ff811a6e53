//! Custom resources owned by this controller.
//!
//! `GatewayClassConfig` parameterizes a GatewayClass. `MeshService` names a service that only
//! exists in the mesh catalog so routes can target it. `GatewayPolicy` attaches JWT requirements
//! to gateway listeners and the route filters extend HTTPRoute rules through `extensionRef`.

use std::collections::BTreeMap;

use k8s_openapi::{api::core::v1::Toleration, apimachinery::pkg::apis::meta::v1::Condition};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "meshgate.io", version = "v1alpha1", kind = "GatewayClassConfig")]
#[serde(rename_all = "camelCase")]
pub struct GatewayClassConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub copy_annotations: CopyAnnotations,
    #[serde(default)]
    pub deployment: DeploymentSpec,
    /// Offset added to listener ports below 1024 when mapping them onto container ports.
    #[serde(default)]
    pub map_privileged_container_ports: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CopyAnnotations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_instances: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_instances: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl DeploymentSpec {
    /// Default instance count clamped to the configured bounds.
    pub fn replicas(&self) -> i32 {
        let mut replicas = self.default_instances.unwrap_or(1);
        if let Some(max) = self.max_instances {
            replicas = replicas.min(max);
        }
        if let Some(min) = self.min_instances {
            replicas = replicas.max(min);
        }
        replicas
    }
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[kube(group = "meshgate.io", version = "v1alpha1", kind = "MeshService", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct MeshServiceSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JwtClaimVerification {
    #[serde(default)]
    pub path: Vec<String>,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JwtProviderRequirement {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verify_claims: Vec<JwtClaimVerification>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JwtRequirement {
    #[serde(default)]
    pub providers: Vec<JwtProviderRequirement>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTargetReference {
    pub group: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayPolicyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<JwtRequirement>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct PolicyStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[kube(group = "meshgate.io", version = "v1alpha1", kind = "GatewayPolicy", namespaced, status = "PolicyStatus")]
#[serde(rename_all = "camelCase")]
pub struct GatewayPolicySpec {
    pub target_ref: PolicyTargetReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#override: Option<GatewayPolicyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<GatewayPolicyConfig>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[kube(group = "meshgate.io", version = "v1alpha1", kind = "RouteAuthFilter", namespaced, status = "PolicyStatus", derive = "PartialEq")]
#[serde(rename_all = "camelCase")]
pub struct RouteAuthFilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<JwtRequirement>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[kube(group = "meshgate.io", version = "v1alpha1", kind = "RouteRetryFilter", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct RouteRetryFilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_on_status_codes: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_on_connect_failure: Option<bool>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[kube(group = "meshgate.io", version = "v1alpha1", kind = "RouteTimeoutFilter", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct RouteTimeoutFilterSpec {
    /// Duration string, for example `10s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<String>,
}

#[cfg(test)]
mod tests {
    use kube::Resource;

    use super::*;

    #[test]
    fn test_gateway_policy() {
        let policy: GatewayPolicy = serde_yaml::from_str(
            r"
apiVersion: meshgate.io/v1alpha1
kind: GatewayPolicy
metadata:
  name: policy
  namespace: infra
spec:
  targetRef:
    group: gateway.networking.k8s.io
    kind: Gateway
    name: gateway
    sectionName: https
  override:
    jwt:
      providers:
        - name: okta
          verifyClaims:
            - path: [role]
              value: admin
  default:
    jwt:
      providers:
        - name: auth0
",
        )
        .unwrap();
        assert_eq!(GatewayPolicy::kind(&()), "GatewayPolicy");
        assert_eq!(policy.spec.target_ref.section_name.as_deref(), Some("https"));
        let providers = &policy.spec.r#override.as_ref().unwrap().jwt.as_ref().unwrap().providers;
        assert_eq!(providers[0].verify_claims[0].path, vec!["role".to_owned()]);
        assert!(policy.status.is_none());
    }

    #[test]
    fn test_gateway_class_config_defaults() {
        let config: GatewayClassConfigSpec = serde_json::from_str(r#"{"mapPrivilegedContainerPorts": 2000}"#).unwrap();
        assert_eq!(config.map_privileged_container_ports, 2000);
        assert_eq!(config.deployment, DeploymentSpec::default());
        assert_eq!(serde_json::to_string(&config).unwrap(), r#"{"copyAnnotations":{},"deployment":{},"mapPrivilegedContainerPorts":2000}"#);
    }

    #[test]
    fn test_replicas_are_clamped() {
        let spec = |default, min, max| DeploymentSpec { default_instances: default, min_instances: min, max_instances: max, image: None };
        assert_eq!(spec(None, None, None).replicas(), 1);
        assert_eq!(spec(Some(3), Some(1), Some(3)).replicas(), 3);
        assert_eq!(spec(Some(8), Some(2), Some(5)).replicas(), 5);
        assert_eq!(spec(Some(1), Some(2), Some(5)).replicas(), 2);
    }
}
