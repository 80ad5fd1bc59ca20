use std::collections::BTreeMap;

use kuberack_common::{Identity, LabRole};
use kuberack_providers::resources::{
    BootDisk, InstanceSpec, MetadataItem, NetworkInterfaceSpec, ServiceAccountSpec,
};

use crate::settings::LabSettings;

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

pub fn machine_class(role: LabRole, lab: &LabSettings) -> &str {
    match role {
        LabRole::Master => &lab.master_machine_type,
        LabRole::Worker1 | LabRole::Worker2 => &lab.worker_machine_type,
    }
}

/// `ssh-keys` metadata value: `<user>:<authorized key> <user>`.
pub fn ssh_keys_entry(user: &str, authorized_key: &str) -> String {
    // The key's own comment is replaced by the login user.
    let mut parts = authorized_key.split_whitespace();
    let key = match (parts.next(), parts.next()) {
        (Some(kind), Some(material)) => format!("{} {}", kind, material),
        _ => authorized_key.trim().to_string(),
    };
    format!("{}:{} {}", user, key, user)
}

/// Fresh instance definition for one lab VM; nothing is shared between calls.
pub fn build_instance_spec(
    role: LabRole,
    identity: &Identity,
    authorized_key: &str,
    lab: &LabSettings,
    source_image: &str,
) -> InstanceSpec {
    let mut labels = BTreeMap::new();
    labels.insert("user".to_string(), identity.name_prefix());

    InstanceSpec {
        name: role.instance_name(identity),
        zone: lab.zone.clone(),
        machine_type: format!("zones/{}/machineTypes/{}", lab.zone, machine_class(role, lab)),
        can_ip_forward: true,
        boot_disk: BootDisk {
            source_image: source_image.to_string(),
            disk_size_gb: lab.boot_disk_size_gb,
            auto_delete: true,
        },
        network_interfaces: vec![
            NetworkInterfaceSpec {
                subnetwork: format!("regions/{}/subnetworks/default", lab.region),
                access_config_name: "External NAT".to_string(),
            },
            NetworkInterfaceSpec {
                subnetwork: lab.network.subnetwork_ref(),
                access_config_name: "Data Plane".to_string(),
            },
        ],
        metadata: vec![MetadataItem {
            key: "ssh-keys".to_string(),
            value: ssh_keys_entry(&lab.ssh_user, authorized_key),
        }],
        service_account: ServiceAccountSpec {
            email: "default".to_string(),
            scopes: vec![CLOUD_PLATFORM_SCOPE.to_string()],
        },
        labels,
    }
}
