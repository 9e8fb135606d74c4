use k8s_openapi::api::networking::v1::Ingress;

use super::Mutator;
use crate::policy::{Feature, Policy};

pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// Pins an ingress to the configured ingress class
pub struct RouteClass;

impl Mutator<Ingress> for RouteClass {
    fn name(&self) -> &'static str {
        "route-class"
    }

    fn feature(&self) -> Feature {
        Feature::Developer
    }

    fn mutate(&self, ingress: &mut Ingress, policy: &Policy) {
        let Some(class) = policy.developer.params.ingress_class.as_deref() else {
            return;
        };

        let annotations = ingress.metadata.annotations.get_or_insert_with(Default::default);
        if annotations.get(INGRESS_CLASS_ANNOTATION).map(String::as_str) == Some(class) {
            return;
        }

        annotations.insert(INGRESS_CLASS_ANNOTATION.to_string(), class.to_string());
    }
}
