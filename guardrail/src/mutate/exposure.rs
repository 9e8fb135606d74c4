use k8s_openapi::api::core::v1::{Service, ServiceSpec};

use super::Mutator;
use crate::policy::{Feature, Policy};

/// Internal-only service type, also the type of services that declare none
pub const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";

/// Restricts services to the allowed exposure types
///
/// A service of any other type becomes `ClusterIP` and loses its node ports
/// along with the settings only valid for externally exposed services.
pub struct ExposureMode;

impl Mutator<Service> for ExposureMode {
    fn name(&self) -> &'static str {
        "exposure-mode"
    }

    fn feature(&self) -> Feature {
        Feature::Developer
    }

    fn mutate(&self, service: &mut Service, policy: &Policy) {
        let Some(spec) = service.spec.as_mut() else {
            return;
        };

        let current = spec.type_.as_deref().unwrap_or(DEFAULT_SERVICE_TYPE);
        if policy.developer.params.service_types.contains(current) {
            return;
        }

        tracing::debug!(from = %current, to = DEFAULT_SERVICE_TYPE, "restricting service exposure");
        spec.type_ = Some(DEFAULT_SERVICE_TYPE.to_string());
        clear_external_exposure(spec);
    }
}

fn clear_external_exposure(spec: &mut ServiceSpec) {
    for port in spec.ports.iter_mut().flatten() {
        port.node_port = None;
    }

    spec.health_check_node_port = None;
    spec.external_traffic_policy = None;
    spec.allocate_load_balancer_node_ports = None;
    spec.load_balancer_ip = None;
    spec.load_balancer_class = None;
    spec.load_balancer_source_ranges = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutate::fixtures::{dev_policy, service};

    fn spec(service: &Service) -> &ServiceSpec {
        service.spec.as_ref().unwrap()
    }

    #[test]
    fn test_load_balancer_becomes_cluster_ip() {
        let mut service = service("dev-1", "LoadBalancer", &[30080, 30443]);
        if let Some(spec) = service.spec.as_mut() {
            spec.external_traffic_policy = Some("Local".to_string());
            spec.health_check_node_port = Some(32000);
        }

        ExposureMode.mutate(&mut service, &dev_policy());

        let spec = spec(&service);
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert!(spec.ports.as_ref().unwrap().iter().all(|p| p.node_port.is_none()));
        assert_eq!(spec.ports.as_ref().unwrap().len(), 2);
        assert_eq!(spec.external_traffic_policy, None);
        assert_eq!(spec.health_check_node_port, None);
    }

    #[test]
    fn test_allowed_type_is_untouched() {
        let mut policy = dev_policy();
        policy.developer.params.service_types.insert("NodePort".to_string());

        let mut service = service("dev-1", "NodePort", &[30080]);
        let before = service.clone();
        ExposureMode.mutate(&mut service, &policy);

        assert_eq!(service, before);
    }

    #[test]
    fn test_missing_type_counts_as_cluster_ip() {
        let mut service = service("dev-1", "ClusterIP", &[]);
        if let Some(spec) = service.spec.as_mut() {
            spec.type_ = None;
        }
        let before = service.clone();

        ExposureMode.mutate(&mut service, &dev_policy());
        assert_eq!(service, before);
    }

    #[test]
    fn test_repeated_application_is_stable() {
        let policy = dev_policy();
        let mut service = service("dev-1", "NodePort", &[30080]);
        ExposureMode.mutate(&mut service, &policy);
        let once = service.clone();
        ExposureMode.mutate(&mut service, &policy);

        assert_eq!(service, once);
    }

    #[test]
    fn test_empty_allowed_set_forces_cluster_ip() {
        let mut policy = dev_policy();
        policy.developer.params.service_types.clear();

        let mut service = service("dev-1", "NodePort", &[30080]);
        ExposureMode.mutate(&mut service, &policy);

        assert_eq!(spec(&service).type_.as_deref(), Some("ClusterIP"));
    }
}
