use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::Result;

const DEFAULT_CERTIFICATE_MOUNT_PATH: &str = "/meshgate/gateway-certificates";
const DEFAULT_LOG_FILE: &str = "meshgate.log";
const DEFAULT_OTLP_ENDPOINT: &str = "http://127.0.0.1:4317";
const DEFAULT_GATEWAY_IMAGE: &str = "hashicorp/consul-dataplane:latest";

#[derive(Clone, Debug, TypedBuilder, Deserialize)]
pub struct MeshConfiguration {
    pub address: String,
    pub datacenter: String,
    #[builder(default)]
    #[serde(default)]
    pub partition: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub namespace: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub token: Option<String>,
    /// Mirror Kubernetes namespaces into mesh namespaces, optionally with a prefix.
    #[builder(default)]
    #[serde(default)]
    pub mirror_namespaces: bool,
    #[builder(default)]
    #[serde(default)]
    pub mirror_namespace_prefix: Option<String>,
}

#[derive(Clone, Debug, TypedBuilder, Deserialize)]
pub struct CacheConfiguration {
    #[builder(default = 2)]
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[builder(default = 300)]
    #[serde(default = "default_watch_timeout_secs")]
    pub watch_timeout_secs: u64,
}

impl Default for CacheConfiguration {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CacheConfiguration {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_watch_timeout_secs() -> u64 {
    300
}

#[derive(Clone, Debug, TypedBuilder, Deserialize)]
pub struct Configuration {
    pub controller_name: String,
    pub mesh: MeshConfiguration,
    #[builder(default)]
    #[serde(default)]
    pub enable_open_telemetry: Option<bool>,
    #[builder(default)]
    #[serde(default)]
    pub certificate_mount_path: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub log_file: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    /// Image run by gateway Deployments unless the GatewayClassConfig names one.
    #[builder(default)]
    #[serde(default)]
    pub gateway_image: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub cache: CacheConfiguration,
    #[builder(default)]
    #[serde(default)]
    pub deny_namespaces: Vec<String>,
    #[builder(default)]
    #[serde(default)]
    pub allow_namespaces: Vec<String>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("controller name must be not empty")]
    ControllerName,
    #[error("mesh address must be not empty")]
    MeshAddress,
    #[error("mesh datacenter must be not empty")]
    Datacenter,
    #[error("namespace {0} is both allowed and denied")]
    NamespaceFilter(String),
}

impl Configuration {
    pub fn validate(&self) -> Result<()> {
        if self.controller_name.is_empty() {
            return Err(ConfigurationError::ControllerName.into());
        }
        if self.mesh.address.is_empty() {
            return Err(ConfigurationError::MeshAddress.into());
        }
        if self.mesh.datacenter.is_empty() {
            return Err(ConfigurationError::Datacenter.into());
        }
        if let Some(namespace) = self.allow_namespaces.iter().find(|n| self.deny_namespaces.contains(n)) {
            return Err(ConfigurationError::NamespaceFilter(namespace.clone()).into());
        }
        Ok(())
    }

    pub fn certificate_mount_path(&self) -> &str {
        self.certificate_mount_path.as_deref().unwrap_or(DEFAULT_CERTIFICATE_MOUNT_PATH)
    }

    pub fn log_file(&self) -> &str {
        self.log_file.as_deref().unwrap_or(DEFAULT_LOG_FILE)
    }

    pub fn gateway_image(&self) -> &str {
        self.gateway_image.as_deref().unwrap_or(DEFAULT_GATEWAY_IMAGE)
    }

    pub fn otlp_endpoint(&self) -> &str {
        self.otlp_endpoint.as_deref().unwrap_or(DEFAULT_OTLP_ENDPOINT)
    }

    /// Kubernetes namespaces this controller watches objects in. An empty allow list means every
    /// namespace that is not denied.
    pub fn namespace_allowed(&self, namespace: &str) -> bool {
        if self.deny_namespaces.iter().any(|n| n == namespace) {
            return false;
        }
        self.allow_namespaces.is_empty() || self.allow_namespaces.iter().any(|n| n == "*" || n == namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIGURATION: &str = r"
controller_name: meshgate.io/gateway-controller
mesh:
  address: http://127.0.0.1:8500
  datacenter: dc1
  mirror_namespaces: true
deny_namespaces:
  - kube-system
";

    #[test]
    fn test_parse_configuration() {
        let configuration: Configuration = serde_yaml::from_str(CONFIGURATION).unwrap();
        assert!(configuration.validate().is_ok());
        assert_eq!(configuration.mesh.datacenter, "dc1");
        assert!(configuration.mesh.mirror_namespaces);
        assert_eq!(configuration.cache.poll_interval_secs, 2);
        assert_eq!(configuration.certificate_mount_path(), DEFAULT_CERTIFICATE_MOUNT_PATH);
        assert_eq!(configuration.gateway_image(), DEFAULT_GATEWAY_IMAGE);
        assert!(!configuration.namespace_allowed("kube-system"));
        assert!(configuration.namespace_allowed("default"));
    }

    #[test]
    fn test_validate_configuration() {
        let mesh = MeshConfiguration::builder().address("http://127.0.0.1:8500".to_owned()).datacenter(String::new()).build();
        let configuration = Configuration::builder().controller_name("controller".to_owned()).mesh(mesh.clone()).build();
        let err = configuration.validate().unwrap_err();
        assert_eq!(err.downcast_ref::<ConfigurationError>(), Some(&ConfigurationError::Datacenter));

        let configuration = Configuration::builder().controller_name(String::new()).mesh(mesh).build();
        let err = configuration.validate().unwrap_err();
        assert_eq!(err.downcast_ref::<ConfigurationError>(), Some(&ConfigurationError::ControllerName));

        let mesh = MeshConfiguration::builder().address("http://127.0.0.1:8500".to_owned()).datacenter("dc1".to_owned()).build();
        let configuration = Configuration::builder()
            .controller_name("controller".to_owned())
            .mesh(mesh)
            .allow_namespaces(vec!["default".to_owned()])
            .deny_namespaces(vec!["default".to_owned()])
            .build();
        let err = configuration.validate().unwrap_err();
        assert_eq!(err.downcast_ref::<ConfigurationError>(), Some(&ConfigurationError::NamespaceFilter("default".to_owned())));
    }
}
