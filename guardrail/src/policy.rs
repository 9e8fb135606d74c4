use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{NodeSelectorRequirement, NodeSelectorTerm};

use crate::config::{DEFAULT_DNS_IMAGE, InitializerConfig};
use crate::error::Error;
use crate::matcher::NamespaceMatcher;

/// Policy features that gate mutators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// `userConfig.local_dns`
    LocalDns,
    /// `userConfig.developer`
    Developer,
}

impl Feature {
    pub const fn name(self) -> &'static str {
        match self {
            Self::LocalDns => "local_dns",
            Self::Developer => "developer",
        }
    }
}

/// Enable flag and namespace scope of one feature
#[derive(Debug, Clone)]
pub struct Gate<P> {
    pub enabled: bool,
    pub namespaces: NamespaceMatcher,
    pub params: P,
}

impl<P> Gate<P> {
    fn new(feature: Feature, enabled: bool, pattern: &str, params: P) -> Result<Self, Error> {
        let namespaces = NamespaceMatcher::new(pattern).map_err(|source| Error::InvalidPattern {
            feature: feature.name(),
            source,
        })?;

        Ok(Self {
            enabled,
            namespaces,
            params,
        })
    }

    pub fn applies(&self, namespace: &str) -> bool {
        self.enabled && self.namespaces.matches(namespace)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalDns {
    /// Image running the resolv.conf generator
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Developer {
    pub node_selector_terms: Vec<NodeSelectorTerm>,
    /// Ingress class to enforce, `None` leaves ingresses alone
    pub ingress_class: Option<String>,
    /// Service types that may stay as they are
    pub service_types: BTreeSet<String>,
}

/// Immutable, validated policy shared by every reconciliation
#[derive(Debug, Clone)]
pub struct Policy {
    pub local_dns: Gate<LocalDns>,
    pub developer: Gate<Developer>,
}

impl Policy {
    /// Whether `feature` is enabled and scoped to `namespace`
    pub fn applies(&self, feature: Feature, namespace: &str) -> bool {
        match feature {
            Feature::LocalDns => self.local_dns.applies(namespace),
            Feature::Developer => self.developer.applies(namespace),
        }
    }
}

impl TryFrom<InitializerConfig> for Policy {
    type Error = Error;

    fn try_from(config: InitializerConfig) -> Result<Self, Self::Error> {
        let dns = config.user_config.local_dns;
        let developer = config.user_config.developer;

        let local_dns = Gate::new(
            Feature::LocalDns,
            dns.enable,
            &dns.namespace_pattern,
            LocalDns {
                image: dns
                    .image
                    .filter(|image| !image.is_empty())
                    .unwrap_or_else(|| DEFAULT_DNS_IMAGE.to_string()),
            },
        )?;

        let ingress_class = Some(developer.ingress.class).filter(|class| !class.is_empty());
        let developer = Gate::new(
            Feature::Developer,
            developer.enable,
            &developer.namespace_pattern,
            Developer {
                node_selector_terms: developer
                    .node_selector_terms
                    .iter()
                    .map(normalized_term)
                    .collect(),
                ingress_class,
                service_types: developer.service.types.into_iter().collect(),
            },
        )?;

        Ok(Self {
            local_dns,
            developer,
        })
    }
}

/// `term` as the API server stores it, with empty lists dropped
pub(crate) fn normalized_term(term: &NodeSelectorTerm) -> NodeSelectorTerm {
    NodeSelectorTerm {
        match_expressions: normalized_requirements(term.match_expressions.as_deref()),
        match_fields: normalized_requirements(term.match_fields.as_deref()),
    }
}

fn normalized_requirements(
    requirements: Option<&[NodeSelectorRequirement]>,
) -> Option<Vec<NodeSelectorRequirement>> {
    let requirements = requirements.filter(|requirements| !requirements.is_empty())?;
    Some(
        requirements
            .iter()
            .map(|requirement| NodeSelectorRequirement {
                key: requirement.key.clone(),
                operator: requirement.operator.clone(),
                values: requirement.values.clone().filter(|values| !values.is_empty()),
            })
            .collect(),
    )
}

#[cfg(test)]
impl Policy {
    pub(crate) fn from_yaml(document: &str) -> Self {
        Self::try_from(InitializerConfig::from_yaml(document).unwrap()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(document: &str) -> Result<Policy, Error> {
        Policy::try_from(InitializerConfig::from_yaml(document)?)
    }

    #[test]
    fn test_gates_follow_enable_and_pattern() {
        let policy = load(
            r#"
userConfig:
  local_dns: { enable: true, namespacePattern: "^dev-.*" }
  developer: { enable: false, namespacePattern: "^dev-.*" }
"#,
        )
        .unwrap();

        assert!(policy.applies(Feature::LocalDns, "dev-team1"));
        assert!(!policy.applies(Feature::LocalDns, "prod-team1"));
        assert!(!policy.applies(Feature::Developer, "dev-team1"));
    }

    #[test]
    fn test_invalid_pattern_names_feature() {
        let err = load(
            r#"
userConfig:
  developer: { enable: true, namespacePattern: "(dev" }
"#,
        )
        .unwrap_err();

        assert!(matches!(err, Error::InvalidPattern { feature: "developer", .. }));
    }

    #[test]
    fn test_defaults() {
        let policy = load("userConfig: {}").unwrap();
        assert_eq!(policy.local_dns.params.image, DEFAULT_DNS_IMAGE);
        assert_eq!(policy.developer.params.ingress_class, None);
        assert!(policy.developer.params.service_types.is_empty());
        assert!(!policy.applies(Feature::LocalDns, "dev-1"));
    }

    #[test]
    fn test_terms_drop_empty_lists() {
        let policy = Policy::from_yaml(
            r#"
userConfig:
  developer:
    enable: true
    nodeSelectorTerms:
      - matchExpressions:
          - { key: gpu, operator: Exists, values: [] }
        matchFields: []
"#,
        );

        assert_eq!(
            policy.developer.params.node_selector_terms,
            vec![NodeSelectorTerm {
                match_expressions: Some(vec![NodeSelectorRequirement {
                    key: "gpu".to_string(),
                    operator: "Exists".to_string(),
                    values: None,
                }]),
                match_fields: None,
            }]
        );
    }

    #[test]
    fn test_empty_pattern_with_enable_applies_everywhere() {
        let policy = Policy::from_yaml(
            r#"
userConfig:
  developer: { enable: true }
"#,
        );
        assert!(policy.applies(Feature::Developer, "prod-1"));
        assert!(policy.applies(Feature::Developer, ""));
        assert!(!policy.applies(Feature::LocalDns, "prod-1"));
    }
}
