use crate::inventory::{InstanceDetails, OperationHandle, OperationState, OperationStatus};
use crate::resources::{InstanceSpec, NetworkSpec, SubnetworkSpec};
use crate::{ComputeProvider, OperationScope};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;

const COMPUTE_API: &str = "https://compute.googleapis.com/compute/v1";

/// Compute Engine v1 REST client.
///
/// Authentication is an already-issued OAuth access token; minting and
/// refreshing it belongs to the deployment, not to this client.
pub struct GceProvider {
    client: Client,
    base_url: String,
    project: String,
    access_token: String,
}

impl GceProvider {
    pub fn new(project: String, access_token: String) -> Result<Self> {
        Self::with_base_url(COMPUTE_API.to_string(), project, access_token)
    }

    pub fn with_base_url(base_url: String, project: String, access_token: String) -> Result<Self> {
        // Every API call is bounded; the workflow never waits on a stalled connection.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build compute HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project: project.trim().to_string(),
            access_token: access_token.trim().to_string(),
        })
    }

    fn project_url(&self, path: &str) -> String {
        format!("{}/projects/{}/{}", self.base_url, self.project, path)
    }

    fn operation_path(scope: &OperationScope, name: &str) -> String {
        match scope {
            OperationScope::Zonal { zone } => format!("zones/{}/operations/{}", zone, name),
            OperationScope::Regional { region } => {
                format!("regions/{}/operations/{}", region, name)
            }
            OperationScope::Global => format!("global/operations/{}", name),
        }
    }

    async fn insert(
        &self,
        path: &str,
        body: serde_json::Value,
        scope: OperationScope,
    ) -> Result<OperationHandle> {
        let url = self.project_url(path);
        tracing::debug!(%url, "compute insert");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::error!(%url, status = status.as_u16(), response = %text, "compute insert failed");
            return Err(anyhow::anyhow!(
                "compute insert {} failed: status={} body={}",
                path,
                status.as_u16(),
                text
            ));
        }

        let json_resp: serde_json::Value = resp.json().await?;
        let name = json_resp["name"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("No operation name in insert response for {}", path))?
            .to_string();
        Ok(OperationHandle { name, scope })
    }

    /// GET returning None on 404.
    async fn get_optional(&self, path: &str) -> Result<Option<serde_json::Value>> {
        let url = self.project_url(path);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "compute GET {} failed: status={} body={}",
                path,
                status.as_u16(),
                text
            ));
        }
        Ok(Some(resp.json().await?))
    }
}

/// Compute API request body for an instance insert.
pub fn instance_body(spec: &InstanceSpec) -> serde_json::Value {
    let network_interfaces: Vec<serde_json::Value> = spec
        .network_interfaces
        .iter()
        .map(|nic| {
            json!({
                "subnetwork": nic.subnetwork,
                "accessConfigs": [
                    {"type": "ONE_TO_ONE_NAT", "name": nic.access_config_name}
                ]
            })
        })
        .collect();
    let metadata_items: Vec<serde_json::Value> = spec
        .metadata
        .iter()
        .map(|item| json!({"key": item.key, "value": item.value}))
        .collect();

    json!({
        "name": spec.name,
        "machineType": spec.machine_type,
        "canIpForward": spec.can_ip_forward,
        "disks": [
            {
                "boot": true,
                "autoDelete": spec.boot_disk.auto_delete,
                "initializeParams": {
                    "sourceImage": spec.boot_disk.source_image,
                    "diskSizeGb": spec.boot_disk.disk_size_gb.to_string(),
                }
            }
        ],
        "metadata": {"items": metadata_items},
        "networkInterfaces": network_interfaces,
        "serviceAccounts": [
            {"email": spec.service_account.email, "scopes": spec.service_account.scopes}
        ],
        "labels": spec.labels,
    })
}

fn parse_operation(json_resp: serde_json::Value, fallback_name: &str) -> Result<OperationStatus> {
    let state: OperationState = serde_json::from_value(json_resp["status"].clone())
        .with_context(|| format!("unexpected operation status in {}", json_resp))?;
    let name = json_resp["name"]
        .as_str()
        .unwrap_or(fallback_name)
        .to_string();
    let error = json_resp.get("error").filter(|e| !e.is_null()).cloned();
    Ok(OperationStatus {
        name,
        state,
        error,
        payload: json_resp,
    })
}

#[async_trait]
impl ComputeProvider for GceProvider {
    async fn create_network(&self, spec: &NetworkSpec) -> Result<OperationHandle> {
        let body = json!({
            "name": spec.name,
            "autoCreateSubnetworks": spec.auto_create_subnetworks,
        });
        self.insert("global/networks", body, OperationScope::Global)
            .await
    }

    async fn create_subnetwork(&self, spec: &SubnetworkSpec) -> Result<OperationHandle> {
        let body = json!({
            "name": spec.name,
            "network": spec.network,
            "ipCidrRange": spec.ip_cidr_range,
        });
        let path = format!("regions/{}/subnetworks", spec.region);
        let scope = OperationScope::Regional {
            region: spec.region.clone(),
        };
        self.insert(&path, body, scope).await
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<OperationHandle> {
        let path = format!("zones/{}/instances", spec.zone);
        let scope = OperationScope::Zonal {
            zone: spec.zone.clone(),
        };
        self.insert(&path, instance_body(spec), scope).await
    }

    async fn get_operation(&self, scope: &OperationScope, name: &str) -> Result<OperationStatus> {
        let path = Self::operation_path(scope, name);
        let json_resp = self
            .get_optional(&path)
            .await?
            .ok_or_else(|| anyhow::anyhow!("operation {} not found ({})", name, scope))?;
        parse_operation(json_resp, name)
    }

    async fn get_instance(&self, zone: &str, name: &str) -> Result<InstanceDetails> {
        let path = format!("zones/{}/instances/{}", zone, name);
        let json_resp = self
            .get_optional(&path)
            .await?
            .ok_or_else(|| anyhow::anyhow!("instance {} not found in {}", name, zone))?;
        serde_json::from_value(json_resp)
            .with_context(|| format!("unexpected instance resource for {}", name))
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        let path = format!("global/networks/{}", name);
        Ok(self.get_optional(&path).await?.is_some())
    }

    async fn subnetwork_exists(&self, region: &str, name: &str) -> Result<bool> {
        let path = format!("regions/{}/subnetworks/{}", region, name);
        Ok(self.get_optional(&path).await?.is_some())
    }

    async fn resolve_source_image(&self, image: &str) -> Result<Option<String>> {
        // Only bare image names and project-relative paths are resolved; full URLs pass through.
        if image.starts_with("https://") || image.starts_with("projects/") {
            return Ok(None);
        }
        let path = if image.starts_with("global/images/") {
            image.to_string()
        } else {
            format!("global/images/{}", image)
        };
        let json_resp = self.get_optional(&path).await?;
        Ok(json_resp.and_then(|v| v["selfLink"].as_str().map(|s| s.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{BootDisk, MetadataItem, NetworkInterfaceSpec, ServiceAccountSpec};

    #[test]
    fn operation_paths_follow_scope() {
        let zonal = OperationScope::Zonal {
            zone: "us-central1-a".to_string(),
        };
        assert_eq!(
            GceProvider::operation_path(&zonal, "op-1"),
            "zones/us-central1-a/operations/op-1"
        );
        let regional = OperationScope::Regional {
            region: "us-central1".to_string(),
        };
        assert_eq!(
            GceProvider::operation_path(&regional, "op-2"),
            "regions/us-central1/operations/op-2"
        );
        assert_eq!(
            GceProvider::operation_path(&OperationScope::Global, "op-3"),
            "global/operations/op-3"
        );
    }

    #[test]
    fn parse_operation_extracts_error_payload() {
        let done = parse_operation(
            json!({"name": "op-1", "status": "DONE", "error": {"errors": [{"code": "QUOTA_EXCEEDED"}]}}),
            "op-1",
        )
        .unwrap();
        assert!(done.is_done());
        assert_eq!(done.error.unwrap()["errors"][0]["code"], "QUOTA_EXCEEDED");

        let running = parse_operation(json!({"name": "op-2", "status": "RUNNING"}), "op-2").unwrap();
        assert!(!running.is_done());
        assert!(running.error.is_none());

        assert!(parse_operation(json!({"name": "op-3", "status": "EXPLODED"}), "op-3").is_err());
    }

    #[test]
    fn instance_body_carries_both_interfaces_and_ssh_keys() {
        let spec = InstanceSpec {
            name: "alice-example-com-k8s-master".to_string(),
            zone: "us-central1-a".to_string(),
            machine_type: "zones/us-central1-a/machineTypes/n1-standard-2".to_string(),
            can_ip_forward: true,
            boot_disk: BootDisk {
                source_image: "global/images/introk8s-image".to_string(),
                disk_size_gb: 100,
                auto_delete: true,
            },
            network_interfaces: vec![
                NetworkInterfaceSpec {
                    subnetwork: "regions/us-central1/subnetworks/default".to_string(),
                    access_config_name: "External NAT".to_string(),
                },
                NetworkInterfaceSpec {
                    subnetwork: "regions/us-central1/subnetworks/dataplane".to_string(),
                    access_config_name: "Data Plane".to_string(),
                },
            ],
            metadata: vec![MetadataItem {
                key: "ssh-keys".to_string(),
                value: "kuberack:ssh-ed25519 AAAA kuberack".to_string(),
            }],
            service_account: ServiceAccountSpec {
                email: "default".to_string(),
                scopes: vec!["https://www.googleapis.com/auth/cloud-platform".to_string()],
            },
            labels: [("user".to_string(), "alice-example-com".to_string())]
                .into_iter()
                .collect(),
        };
        let body = instance_body(&spec);
        assert_eq!(body["networkInterfaces"].as_array().unwrap().len(), 2);
        assert_eq!(
            body["networkInterfaces"][1]["accessConfigs"][0]["name"],
            "Data Plane"
        );
        assert_eq!(body["metadata"]["items"][0]["key"], "ssh-keys");
        assert_eq!(body["labels"]["user"], "alice-example-com");
        assert_eq!(body["disks"][0]["initializeParams"]["diskSizeGb"], "100");
    }

    mod http {
        use super::*;
        use axum::extract::Path;
        use axum::http::{HeaderMap, StatusCode};
        use axum::response::{IntoResponse, Response};
        use axum::routing::{get, post};
        use axum::{Json, Router};

        const PROJECT: &str = "lab-project";
        const TOKEN: &str = "tok-123";

        fn authorized(headers: &HeaderMap) -> bool {
            headers
                .get("authorization")
                .and_then(|h| h.to_str().ok())
                .is_some_and(|h| h == format!("Bearer {}", TOKEN))
        }

        fn not_found() -> Response {
            (StatusCode::NOT_FOUND, Json(json!({"error": {"code": 404}}))).into_response()
        }

        fn compute_api() -> Router {
            Router::new()
                .route(
                    "/projects/lab-project/global/networks",
                    post(|headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                        if !authorized(&headers) {
                            return StatusCode::UNAUTHORIZED.into_response();
                        }
                        let name = body["name"].as_str().unwrap_or_default().to_string();
                        Json(json!({"name": format!("op-network-{}", name), "status": "RUNNING"}))
                            .into_response()
                    }),
                )
                .route(
                    "/projects/lab-project/regions/{region}/subnetworks",
                    post(|| async { Json(json!({"kind": "compute#operation"})) }),
                )
                .route(
                    "/projects/lab-project/zones/{zone}/instances",
                    post(|| async { (StatusCode::FORBIDDEN, "QUOTA_EXCEEDED: CPUS") }),
                )
                .route(
                    "/projects/lab-project/global/networks/{name}",
                    get(|Path(name): Path<String>| async move {
                        if name == "dataplane" {
                            Json(json!({"name": name})).into_response()
                        } else {
                            not_found()
                        }
                    }),
                )
                .route(
                    "/projects/lab-project/regions/{region}/subnetworks/{name}",
                    get(|Path((region, name)): Path<(String, String)>| async move {
                        if region == "us-central1" && name == "dataplane" {
                            Json(json!({"name": name})).into_response()
                        } else {
                            not_found()
                        }
                    }),
                )
                .route(
                    "/projects/lab-project/global/images/{name}",
                    get(|Path(name): Path<String>| async move {
                        if name == "introk8s-image" {
                            Json(json!({
                                "name": name,
                                "selfLink": "https://compute.example/projects/lab-project/global/images/introk8s-image",
                            }))
                            .into_response()
                        } else {
                            not_found()
                        }
                    }),
                )
                .route(
                    "/projects/lab-project/zones/{zone}/operations/{name}",
                    get(|Path((_zone, name)): Path<(String, String)>| async move {
                        if name == "op-missing" {
                            return not_found();
                        }
                        Json(json!({
                            "name": name,
                            "status": "DONE",
                            "error": {"errors": [{"code": "ZONE_RESOURCE_POOL_EXHAUSTED"}]},
                        }))
                        .into_response()
                    }),
                )
                .route(
                    "/projects/lab-project/zones/{zone}/instances/{name}",
                    get(|Path((_zone, name)): Path<(String, String)>| async move {
                        if name == "broken" {
                            return (StatusCode::INTERNAL_SERVER_ERROR, "backend error").into_response();
                        }
                        Json(json!({
                            "name": name,
                            "status": "RUNNING",
                            "networkInterfaces": [
                                {"networkIP": "10.128.0.2", "accessConfigs": [{"name": "External NAT", "natIP": "198.51.100.10"}]},
                                {"networkIP": "10.129.0.2", "accessConfigs": [{"name": "Data Plane"}]}
                            ]
                        }))
                        .into_response()
                    }),
                )
        }

        async fn provider() -> GceProvider {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, compute_api()).await.unwrap();
            });
            GceProvider::with_base_url(
                format!("http://{}/", addr),
                PROJECT.to_string(),
                format!(" {}\n", TOKEN),
            )
            .unwrap()
        }

        #[tokio::test]
        async fn insert_returns_operation_in_request_scope() {
            let gce = provider().await;
            let handle = gce
                .create_network(&NetworkSpec {
                    name: "dataplane".to_string(),
                    auto_create_subnetworks: false,
                })
                .await
                .unwrap();
            assert_eq!(handle.name, "op-network-dataplane");
            assert_eq!(handle.scope, OperationScope::Global);
        }

        #[tokio::test]
        async fn insert_without_operation_name_is_an_error() {
            let gce = provider().await;
            let err = gce
                .create_subnetwork(&SubnetworkSpec {
                    name: "dataplane".to_string(),
                    region: "us-central1".to_string(),
                    network: "global/networks/dataplane".to_string(),
                    ip_cidr_range: "10.129.0.0/20".to_string(),
                })
                .await
                .unwrap_err();
            assert!(err.to_string().contains("No operation name"), "{}", err);
        }

        #[tokio::test]
        async fn rejected_insert_reports_status_and_body() {
            let gce = provider().await;
            let mut spec = InstanceSpec {
                name: "alice-example-com-k8s-master".to_string(),
                zone: "us-central1-a".to_string(),
                machine_type: "zones/us-central1-a/machineTypes/n1-standard-2".to_string(),
                can_ip_forward: true,
                boot_disk: BootDisk {
                    source_image: "global/images/introk8s-image".to_string(),
                    disk_size_gb: 100,
                    auto_delete: true,
                },
                network_interfaces: Vec::new(),
                metadata: Vec::new(),
                service_account: ServiceAccountSpec {
                    email: "default".to_string(),
                    scopes: Vec::new(),
                },
                labels: Default::default(),
            };
            spec.network_interfaces.push(NetworkInterfaceSpec {
                subnetwork: "regions/us-central1/subnetworks/default".to_string(),
                access_config_name: "External NAT".to_string(),
            });
            let err = gce.create_instance(&spec).await.unwrap_err().to_string();
            assert!(err.contains("status=403"), "{}", err);
            assert!(err.contains("QUOTA_EXCEEDED"), "{}", err);
        }

        #[tokio::test]
        async fn missing_resources_read_as_absent() {
            let gce = provider().await;
            assert!(gce.network_exists("dataplane").await.unwrap());
            assert!(!gce.network_exists("other").await.unwrap());
            assert!(gce.subnetwork_exists("us-central1", "dataplane").await.unwrap());
            assert!(!gce.subnetwork_exists("europe-west1", "dataplane").await.unwrap());
        }

        #[tokio::test]
        async fn source_image_resolves_to_self_link() {
            let gce = provider().await;
            let expected = "https://compute.example/projects/lab-project/global/images/introk8s-image";
            assert_eq!(
                gce.resolve_source_image("introk8s-image").await.unwrap().as_deref(),
                Some(expected)
            );
            assert_eq!(
                gce.resolve_source_image("global/images/introk8s-image")
                    .await
                    .unwrap()
                    .as_deref(),
                Some(expected)
            );
            assert_eq!(gce.resolve_source_image("unknown-image").await.unwrap(), None);
            // Fully qualified references are used as given, without a lookup.
            assert_eq!(
                gce.resolve_source_image("projects/debian-cloud/global/images/debian-12")
                    .await
                    .unwrap(),
                None
            );
            assert_eq!(
                gce.resolve_source_image("https://compute.example/x").await.unwrap(),
                None
            );
        }

        #[tokio::test]
        async fn operation_and_instance_reads() {
            let gce = provider().await;
            let zonal = OperationScope::Zonal {
                zone: "us-central1-a".to_string(),
            };
            let status = gce.get_operation(&zonal, "op-7").await.unwrap();
            assert!(status.is_done());
            assert_eq!(
                status.error.unwrap()["errors"][0]["code"],
                "ZONE_RESOURCE_POOL_EXHAUSTED"
            );
            assert!(gce.get_operation(&zonal, "op-missing").await.is_err());

            let details = gce
                .get_instance("us-central1-a", "alice-example-com-k8s-master")
                .await
                .unwrap();
            assert_eq!(details.first_external_address(), Some("198.51.100.10"));

            let err = gce.get_instance("us-central1-a", "broken").await.unwrap_err();
            assert!(err.to_string().contains("status=500"), "{}", err);
        }
    }
}
