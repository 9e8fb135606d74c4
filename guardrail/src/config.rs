//! Policy document as stored in the cluster
//!
//! The document lives under the `config` key of a ConfigMap and is YAML:
//!
//! ```yaml
//! userConfig:
//!   local_dns:
//!     enable: true
//!     namespacePattern: "^dev-.*"
//!   developer:
//!     enable: true
//!     namespacePattern: "^dev-.*"
//!     nodeSelectorTerms:
//!       - matchExpressions:
//!           - { key: zone, operator: In, values: [a] }
//!     ingress:
//!       class: nginx
//!     service:
//!       types: [ClusterIP]
//! ```

use std::path::Path;

use k8s_openapi::api::core::v1::{ConfigMap, NodeSelectorTerm};
use kube::{Api, Client};
use serde::Deserialize;

use crate::Result;
use crate::error::Error;

/// ConfigMap key holding the policy document
pub const CONFIG_KEY: &str = "config";

/// Image used for the resolv.conf generator when none is configured
pub const DEFAULT_DNS_IMAGE: &str = "alpine";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializerConfig {
    #[serde(default)]
    pub user_config: UserConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub local_dns: LocalDnsConfig,
    #[serde(default)]
    pub developer: DeveloperConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDnsConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub namespace_pattern: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeveloperConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub namespace_pattern: String,
    #[serde(default)]
    pub node_selector_terms: Vec<NodeSelectorTerm>,
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngressConfig {
    #[serde(default)]
    pub class: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub types: Vec<String>,
}

impl InitializerConfig {
    pub fn from_yaml(document: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(document)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|err| {
            Error::ConfigurationError(format!("reading {}: {err}", path.display()))
        })?;
        Self::from_yaml(&document)
    }

    /// Fetches and parses the policy ConfigMap
    pub async fn from_configmap(client: Client, namespace: &str, name: &str) -> Result<Self> {
        let api: Api<ConfigMap> = Api::namespaced(client, namespace);
        let configmap = api.get(name).await?;

        let document = configmap
            .data
            .as_ref()
            .and_then(|data| data.get(CONFIG_KEY))
            .ok_or_else(|| {
                Error::ConfigurationError(format!(
                    "configmap {namespace}/{name} has no `{CONFIG_KEY}` key"
                ))
            })?;

        tracing::debug!(configmap = %name, namespace = %namespace, "loaded policy document");
        Self::from_yaml(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_document() {
        let config = InitializerConfig::from_yaml(
            r#"
userConfig:
  local_dns:
    enable: true
    namespacePattern: "^dev-.*"
  developer:
    enable: true
    namespacePattern: "^dev-.*"
    nodeSelectorTerms:
      - matchExpressions:
          - key: zone
            operator: In
            values: [a]
    ingress:
      class: nginx
    service:
      types: [ClusterIP, NodePort]
"#,
        )
        .unwrap();

        let user = config.user_config;
        assert!(user.local_dns.enable);
        assert_eq!(user.local_dns.namespace_pattern, "^dev-.*");
        assert_eq!(user.local_dns.image, None);
        assert!(user.developer.enable);
        assert_eq!(user.developer.ingress.class, "nginx");
        assert_eq!(user.developer.service.types, vec!["ClusterIP", "NodePort"]);

        let terms = &user.developer.node_selector_terms;
        assert_eq!(terms.len(), 1);
        let expr = &terms[0].match_expressions.as_ref().unwrap()[0];
        assert_eq!(expr.key, "zone");
        assert_eq!(expr.operator, "In");
        assert_eq!(expr.values.as_deref(), Some(&["a".to_string()][..]));
    }

    #[test]
    fn test_missing_sections_default_to_disabled() {
        let config = InitializerConfig::from_yaml("userConfig: {}").unwrap();
        assert!(!config.user_config.local_dns.enable);
        assert!(!config.user_config.developer.enable);
        assert!(config.user_config.developer.node_selector_terms.is_empty());
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let err = InitializerConfig::from_yaml("userConfig: [").unwrap_err();
        assert!(matches!(err, Error::YamlError(_)));
    }
}
