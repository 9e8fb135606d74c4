use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec, Volume,
    VolumeMount,
};

use super::Mutator;
use crate::policy::{Feature, LocalDns, Policy};

/// Scratch volume holding the generated resolv.conf
pub const RESOLV_VOLUME: &str = "resolv";
/// Init container that writes the generated resolv.conf
pub const RESOLV_GENERATOR: &str = "resolv-generator";
pub const RESOLV_MOUNT_PATH: &str = "/etc/resolv.conf";

const RESOLV_SUB_PATH: &str = "resolv.conf";
const GENERATOR_MOUNT_PATH: &str = "/mount";
const HOST_IP_ENV: &str = "HOST_IP";
const GENERATE_SCRIPT: &str = "echo \"nameserver $HOST_IP\" >> /mount/resolv.conf && cat /etc/resolv.conf >> /mount/resolv.conf";

/// Points every container's resolver at a node-local DNS cache
///
/// Mounts a generated resolv.conf, whose first nameserver is the node's IP,
/// over `/etc/resolv.conf`.
pub struct DnsOverride;

impl Mutator<Deployment> for DnsOverride {
    fn name(&self) -> &'static str {
        "dns-override"
    }

    fn feature(&self) -> Feature {
        Feature::LocalDns
    }

    fn mutate(&self, deployment: &mut Deployment, policy: &Policy) {
        let Some(pod) = deployment
            .spec
            .as_mut()
            .and_then(|spec| spec.template.spec.as_mut())
        else {
            tracing::debug!("deployment without pod template, skipping dns override");
            return;
        };

        ensure_volume(pod);
        for container in &mut pod.containers {
            ensure_mount(container);
        }
        ensure_generator(pod, &policy.local_dns.params);
    }
}

fn ensure_volume(pod: &mut PodSpec) {
    let volumes = pod.volumes.get_or_insert_with(Vec::new);
    if volumes.iter().any(|volume| volume.name == RESOLV_VOLUME) {
        return;
    }

    volumes.push(Volume {
        name: RESOLV_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    });
}

fn ensure_mount(container: &mut Container) {
    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    if mounts.iter().any(|mount| mount.mount_path == RESOLV_MOUNT_PATH) {
        return;
    }

    mounts.push(VolumeMount {
        name: RESOLV_VOLUME.to_string(),
        mount_path: RESOLV_MOUNT_PATH.to_string(),
        sub_path: Some(RESOLV_SUB_PATH.to_string()),
        read_only: Some(true),
        ..Default::default()
    });
}

fn ensure_generator(pod: &mut PodSpec, params: &LocalDns) {
    let init_containers = pod.init_containers.get_or_insert_with(Vec::new);
    if init_containers
        .iter()
        .any(|container| container.name == RESOLV_GENERATOR)
    {
        return;
    }

    init_containers.push(Container {
        name: RESOLV_GENERATOR.to_string(),
        image: Some(params.image.clone()),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            GENERATE_SCRIPT.to_string(),
        ]),
        env: Some(vec![EnvVar {
            name: HOST_IP_ENV.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "status.hostIP".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: RESOLV_VOLUME.to_string(),
            mount_path: GENERATOR_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    });
}
