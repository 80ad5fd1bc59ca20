use crate::inventory::{
    AccessConfig, InstanceDetails, NetworkInterface, OperationHandle, OperationState,
    OperationStatus,
};
use crate::resources::{InstanceSpec, NetworkSpec, SubnetworkSpec};
use crate::{ComputeProvider, OperationScope};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// A creation call observed by the mock, in issue order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockCall {
    CreateNetwork(String),
    CreateSubnetwork(String),
    CreateInstance(String),
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    op_counter: u64,
    /// Remaining scripted statuses per operation; an exhausted script reports DONE.
    scripts: HashMap<String, VecDeque<OperationScript>>,
    polls: HashMap<String, usize>,
    pending_polls: usize,
    networks: HashSet<String>,
    subnetworks: HashSet<(String, String)>,
    instances: HashMap<String, InstanceSpec>,
    addresses: HashMap<String, Option<String>>,
    failing_resources: HashMap<String, serde_json::Value>,
    next_host: u8,
}

#[derive(Clone, Debug)]
enum OperationScript {
    Pending,
    Done(Option<serde_json::Value>),
}

/// In-memory compute provider for tests and local runs.
///
/// Every created resource gets an operation that reports `pending_polls`
/// PENDING statuses before DONE. Instances get sequential external addresses
/// from 203.0.113.0/24 unless an explicit address was registered.
pub struct MockComputeProvider {
    state: Mutex<MockState>,
}

impl Default for MockComputeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockComputeProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_host: 10,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A poisoned lock only means another test thread panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of PENDING polls every subsequently created operation reports.
    pub fn with_pending_polls(self, polls: usize) -> Self {
        self.lock().pending_polls = polls;
        self
    }

    pub fn with_existing_network(self, name: &str) -> Self {
        self.lock().networks.insert(name.to_string());
        self
    }

    pub fn with_existing_subnetwork(self, region: &str, name: &str) -> Self {
        self.lock()
            .subnetworks
            .insert((region.to_string(), name.to_string()));
        self
    }

    /// External address reported for `instance`; `None` simulates an instance without NAT IP.
    pub fn set_address(&self, instance: &str, address: Option<&str>) {
        self.lock()
            .addresses
            .insert(instance.to_string(), address.map(|s| s.to_string()));
    }

    /// Operations created for `resource` terminate with `error` as payload.
    pub fn fail_resource(&self, resource: &str, error: serde_json::Value) {
        self.lock()
            .failing_resources
            .insert(resource.to_string(), error);
    }

    /// Script the statuses a named operation reports; once exhausted it reports DONE.
    pub fn script_operation(&self, name: &str, states: &[OperationState]) {
        let script = states
            .iter()
            .map(|s| match s {
                OperationState::Done => OperationScript::Done(None),
                _ => OperationScript::Pending,
            })
            .collect();
        self.lock().scripts.insert(name.to_string(), script);
    }

    /// Script an operation that stays pending `pending` times then fails with `error`.
    pub fn script_failed_operation(&self, name: &str, pending: usize, error: serde_json::Value) {
        let mut script: VecDeque<OperationScript> =
            std::iter::repeat(OperationScript::Pending).take(pending).collect();
        script.push_back(OperationScript::Done(Some(error)));
        self.lock().scripts.insert(name.to_string(), script);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn instance_creations(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::CreateInstance(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn poll_count(&self, operation: &str) -> usize {
        self.lock().polls.get(operation).copied().unwrap_or(0)
    }

    pub fn created_instance(&self, name: &str) -> Option<InstanceSpec> {
        self.lock().instances.get(name).cloned()
    }

    fn issue_operation(
        state: &mut MockState,
        resource: &str,
        scope: OperationScope,
    ) -> OperationHandle {
        state.op_counter += 1;
        let name = format!("operation-{}-{}", state.op_counter, resource);
        let mut script: VecDeque<OperationScript> = std::iter::repeat(OperationScript::Pending)
            .take(state.pending_polls)
            .collect();
        script.push_back(OperationScript::Done(
            state.failing_resources.get(resource).cloned(),
        ));
        state.scripts.insert(name.clone(), script);
        OperationHandle { name, scope }
    }
}

#[async_trait]
impl ComputeProvider for MockComputeProvider {
    async fn create_network(&self, spec: &NetworkSpec) -> Result<OperationHandle> {
        let mut state = self.lock();
        if state.networks.contains(&spec.name) {
            return Err(anyhow::anyhow!(
                "mock: network {} already exists",
                spec.name
            ));
        }
        state.calls.push(MockCall::CreateNetwork(spec.name.clone()));
        state.networks.insert(spec.name.clone());
        Ok(Self::issue_operation(&mut state, &spec.name, OperationScope::Global))
    }

    async fn create_subnetwork(&self, spec: &SubnetworkSpec) -> Result<OperationHandle> {
        let mut state = self.lock();
        let key = (spec.region.clone(), spec.name.clone());
        if state.subnetworks.contains(&key) {
            return Err(anyhow::anyhow!(
                "mock: subnetwork {} already exists in {}",
                spec.name,
                spec.region
            ));
        }
        state.calls.push(MockCall::CreateSubnetwork(spec.name.clone()));
        state.subnetworks.insert(key);
        let scope = OperationScope::Regional {
            region: spec.region.clone(),
        };
        Ok(Self::issue_operation(&mut state, &spec.name, scope))
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<OperationHandle> {
        let mut state = self.lock();
        if state.instances.contains_key(&spec.name) {
            return Err(anyhow::anyhow!(
                "mock: instance {} already exists",
                spec.name
            ));
        }
        state.calls.push(MockCall::CreateInstance(spec.name.clone()));
        state.instances.insert(spec.name.clone(), spec.clone());
        if !state.addresses.contains_key(&spec.name) {
            let host = state.next_host;
            state.next_host = state.next_host.wrapping_add(1);
            state
                .addresses
                .insert(spec.name.clone(), Some(format!("203.0.113.{}", host)));
        }
        let scope = OperationScope::Zonal {
            zone: spec.zone.clone(),
        };
        Ok(Self::issue_operation(&mut state, &spec.name, scope))
    }

    async fn get_operation(&self, scope: &OperationScope, name: &str) -> Result<OperationStatus> {
        let mut state = self.lock();
        *state.polls.entry(name.to_string()).or_insert(0) += 1;
        let next = state
            .scripts
            .get_mut(name)
            .and_then(|script| script.pop_front())
            .unwrap_or(OperationScript::Done(None));
        let (op_state, error) = match next {
            OperationScript::Pending => (OperationState::Pending, None),
            OperationScript::Done(error) => (OperationState::Done, error),
        };
        let status = match op_state {
            OperationState::Done => "DONE",
            OperationState::Running => "RUNNING",
            OperationState::Pending => "PENDING",
        };
        let mut payload = serde_json::json!({
            "name": name,
            "status": status,
            "scope": scope.to_string(),
        });
        if let Some(err) = &error {
            payload["error"] = err.clone();
        }
        Ok(OperationStatus {
            name: name.to_string(),
            state: op_state,
            error,
            payload,
        })
    }

    async fn get_instance(&self, zone: &str, name: &str) -> Result<InstanceDetails> {
        let state = self.lock();
        let spec = state
            .instances
            .get(name)
            .filter(|spec| spec.zone == zone)
            .ok_or_else(|| anyhow::anyhow!("mock: instance {} not found in {}", name, zone))?;
        let external = state.addresses.get(name).cloned().flatten();
        let network_interfaces = spec
            .network_interfaces
            .iter()
            .enumerate()
            .map(|(i, nic)| NetworkInterface {
                network_ip: Some(format!("10.{}.0.{}", 128 + i, 2)),
                access_configs: vec![AccessConfig {
                    name: Some(nic.access_config_name.clone()),
                    nat_ip: if i == 0 { external.clone() } else { None },
                }],
            })
            .collect();
        Ok(InstanceDetails {
            name: name.to_string(),
            status: Some("RUNNING".to_string()),
            network_interfaces,
        })
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        Ok(self.lock().networks.contains(name))
    }

    async fn subnetwork_exists(&self, region: &str, name: &str) -> Result<bool> {
        Ok(self
            .lock()
            .subnetworks
            .contains(&(region.to_string(), name.to_string())))
    }
}
