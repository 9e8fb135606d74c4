use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{NodeSelectorTerm, PodSpec};

use super::Mutator;
use crate::policy::{Feature, Policy, normalized_term};

/// Adds the configured node selector terms to a workload's required node affinity
///
/// Terms already present are not added again. Terms are compared in the form
/// the API server stores them, so empty lists equal absent ones.
pub struct Placement;

impl Mutator<Deployment> for Placement {
    fn name(&self) -> &'static str {
        "placement"
    }

    fn feature(&self) -> Feature {
        Feature::Developer
    }

    fn mutate(&self, deployment: &mut Deployment, policy: &Policy) {
        let wanted = &policy.developer.params.node_selector_terms;
        if wanted.is_empty() {
            return;
        }

        let Some(pod) = deployment
            .spec
            .as_mut()
            .and_then(|spec| spec.template.spec.as_mut())
        else {
            return;
        };

        let terms = required_terms(pod);
        for term in wanted {
            let present = terms
                .iter()
                .any(|existing| normalized_term(existing) == *term);
            if !present {
                terms.push(term.clone());
            }
        }
    }
}

/// Required node selector terms of `pod`, creating whichever levels are missing
fn required_terms(pod: &mut PodSpec) -> &mut Vec<NodeSelectorTerm> {
    &mut pod
        .affinity
        .get_or_insert_with(Default::default)
        .node_affinity
        .get_or_insert_with(Default::default)
        .required_during_scheduling_ignored_during_execution
        .get_or_insert_with(Default::default)
        .node_selector_terms
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{
        Affinity, NodeAffinity, NodeSelector, NodeSelectorRequirement, PodAffinity,
    };

    use super::*;
    use crate::mutate::fixtures::{deployment, dev_policy};

    fn term(key: &str, value: &str) -> NodeSelectorTerm {
        NodeSelectorTerm {
            match_expressions: Some(vec![NodeSelectorRequirement {
                key: key.to_string(),
                operator: "In".to_string(),
                values: Some(vec![value.to_string()]),
            }]),
            ..Default::default()
        }
    }

    fn pod_mut(deployment: &mut Deployment) -> &mut PodSpec {
        deployment
            .spec
            .as_mut()
            .and_then(|spec| spec.template.spec.as_mut())
            .unwrap()
    }

    fn terms(deployment: &mut Deployment) -> Vec<NodeSelectorTerm> {
        required_terms(pod_mut(deployment)).clone()
    }

    #[test]
    fn test_creates_placement_section() {
        let mut deployment = deployment("dev-1", &["app"]);
        Placement.mutate(&mut deployment, &dev_policy());

        assert_eq!(terms(&mut deployment), vec![term("zone", "a")]);
    }

    #[test]
    fn test_appends_to_existing_terms() {
        let mut deployment = deployment("dev-1", &["app"]);
        pod_mut(&mut deployment).affinity = Some(Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![term("disk", "ssd")],
                }),
                ..Default::default()
            }),
            ..Default::default()
        });

        Placement.mutate(&mut deployment, &dev_policy());

        assert_eq!(
            terms(&mut deployment),
            vec![term("disk", "ssd"), term("zone", "a")]
        );
    }

    #[test]
    fn test_keeps_unrelated_affinity() {
        let mut deployment = deployment("dev-1", &["app"]);
        pod_mut(&mut deployment).affinity = Some(Affinity {
            pod_affinity: Some(PodAffinity::default()),
            ..Default::default()
        });

        Placement.mutate(&mut deployment, &dev_policy());

        let affinity = pod_mut(&mut deployment).affinity.clone().unwrap();
        assert!(affinity.pod_affinity.is_some());
        assert_eq!(terms(&mut deployment), vec![term("zone", "a")]);
    }

    #[test]
    fn test_repeated_application_does_not_duplicate() {
        let policy = dev_policy();
        let mut deployment = deployment("dev-1", &["app"]);
        Placement.mutate(&mut deployment, &policy);
        Placement.mutate(&mut deployment, &policy);

        assert_eq!(terms(&mut deployment), vec![term("zone", "a")]);
    }

    #[test]
    fn test_exists_term_survives_server_round_trip() {
        let policy = Policy::from_yaml(
            r#"
userConfig:
  developer:
    enable: true
    nodeSelectorTerms:
      - matchExpressions:
          - { key: gpu, operator: Exists, values: [] }
"#,
        );

        let mut deployment = deployment("dev-1", &["app"]);
        Placement.mutate(&mut deployment, &policy);

        // the API server omits empty lists when it returns the object
        for term in required_terms(pod_mut(&mut deployment)) {
            for requirement in term.match_expressions.iter_mut().flatten() {
                requirement.values.take_if(|values| values.is_empty());
            }
        }
        Placement.mutate(&mut deployment, &policy);

        assert_eq!(terms(&mut deployment).len(), 1);
    }

    #[test]
    fn test_term_with_empty_values_counts_as_present() {
        let policy = Policy::from_yaml(
            r#"
userConfig:
  developer:
    enable: true
    nodeSelectorTerms:
      - matchExpressions:
          - { key: gpu, operator: Exists }
"#,
        );

        let mut deployment = deployment("dev-1", &["app"]);
        pod_mut(&mut deployment).affinity = Some(Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_expressions: Some(vec![NodeSelectorRequirement {
                            key: "gpu".to_string(),
                            operator: "Exists".to_string(),
                            values: Some(vec![]),
                        }]),
                        match_fields: Some(vec![]),
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        });

        Placement.mutate(&mut deployment, &policy);
        assert_eq!(terms(&mut deployment).len(), 1);
    }

    #[test]
    fn test_no_terms_leaves_placement_untouched() {
        let mut policy = dev_policy();
        policy.developer.params.node_selector_terms.clear();

        let mut deployment = deployment("dev-1", &["app"]);
        Placement.mutate(&mut deployment, &policy);

        assert!(pod_mut(&mut deployment).affinity.is_none());
    }
}
