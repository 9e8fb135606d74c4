//! Policy mutators
//!
//! A [`Mutator`] applies one policy feature to one kind of object. The
//! [`MutatorSet`] holds the mutators for every kind in their fixed order and is
//! the only place that checks whether a feature applies to an object's
//! namespace.

mod dns;
mod exposure;
mod placement;
mod route_class;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;

use crate::policy::{Feature, Policy};
use crate::resource::ManagedResource;

pub use dns::{DnsOverride, RESOLV_GENERATOR, RESOLV_MOUNT_PATH, RESOLV_VOLUME};
pub use exposure::{DEFAULT_SERVICE_TYPE, ExposureMode};
pub use placement::Placement;
pub use route_class::{INGRESS_CLASS_ANNOTATION, RouteClass};

/// Applies one policy feature to objects of kind `K`
pub trait Mutator<K>: Send + Sync {
    /// Returns the name of this mutator for logging purposes
    fn name(&self) -> &'static str;

    /// Feature whose enable flag and namespace pattern gate this mutator
    fn feature(&self) -> Feature;

    /// Rewrites `resource` in place
    ///
    /// Only called when the feature applies to the object's namespace. Must be
    /// idempotent: a second call on its own output changes nothing.
    fn mutate(&self, resource: &mut K, policy: &Policy);
}

/// Mutators indexed by resource kind, each list in application order
pub struct MutatorSet {
    workload: Vec<Box<dyn Mutator<Deployment>>>,
    route: Vec<Box<dyn Mutator<Ingress>>>,
    endpoint: Vec<Box<dyn Mutator<Service>>>,
}

impl Default for MutatorSet {
    fn default() -> Self {
        Self {
            workload: vec![Box::new(DnsOverride), Box::new(Placement)],
            route: vec![Box::new(RouteClass)],
            endpoint: vec![Box::new(ExposureMode)],
        }
    }
}

impl MutatorSet {
    /// Runs every applicable mutator on `resource`
    ///
    /// Returns the names of the mutators that ran.
    pub fn apply(&self, resource: &mut ManagedResource, policy: &Policy) -> Vec<&'static str> {
        let namespace = resource.namespace().to_string();

        match resource {
            ManagedResource::Workload(deployment) => {
                run_all(&self.workload, deployment, &namespace, policy)
            }
            ManagedResource::Route(ingress) => run_all(&self.route, ingress, &namespace, policy),
            ManagedResource::Endpoint(service) => {
                run_all(&self.endpoint, service, &namespace, policy)
            }
        }
    }

    /// Returns a mutated copy of `original`, leaving it untouched
    pub fn mutated(&self, original: &ManagedResource, policy: &Policy) -> ManagedResource {
        let mut working = original.clone();
        self.apply(&mut working, policy);
        working
    }
}

fn run_all<K>(
    mutators: &[Box<dyn Mutator<K>>],
    resource: &mut K,
    namespace: &str,
    policy: &Policy,
) -> Vec<&'static str> {
    mutators
        .iter()
        .filter(|mutator| policy.applies(mutator.feature(), namespace))
        .map(|mutator| {
            mutator.mutate(resource, policy);
            mutator.name()
        })
        .collect()
}
