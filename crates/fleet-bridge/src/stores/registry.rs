//! VM registry: inventory, heartbeats, and staleness-aware discovery.

use std::path::Path;

use chrono::Duration;
use fleet_core::map_store::MapStore;
use fleet_core::types::{RegisteredVm, VmRole, VmStatus};
use fleet_core::{CoreError, CoreResult};

const DEFAULT_STALE_THRESHOLD_MINUTES: i64 = 5;

#[derive(Clone)]
pub struct RegistryStore {
    vms: MapStore<RegisteredVm>,
    stale_threshold: Duration,
}

impl RegistryStore {
    pub async fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open_with_threshold(path, Duration::minutes(DEFAULT_STALE_THRESHOLD_MINUTES)).await
    }

    pub async fn open_with_threshold(path: impl AsRef<Path>, stale_threshold: Duration) -> CoreResult<Self> {
        Ok(Self {
            vms: MapStore::open(path.as_ref().to_owned()).await?,
            stale_threshold,
        })
    }

    pub async fn register(&self, name: &str, role: VmRole, address: &str, registered_by: &str) -> CoreResult<RegisteredVm> {
        let vm = RegisteredVm::new(name, role, address, registered_by);
        self.vms.mutate(|m| m.insert(vm.id.clone(), vm.clone())).await;
        Ok(vm)
    }

    pub async fn get(&self, id: &str) -> CoreResult<RegisteredVm> {
        self.vms.get(id).await.ok_or_else(|| CoreError::not_found(format!("vm {id} not found")))
    }

    /// Explicit listing never excludes stale VMs; only the `status=running`
    /// filter and discovery do.
    pub async fn list(&self, status: Option<VmStatus>) -> Vec<RegisteredVm> {
        let mut vms = self
            .vms
            .with_map(|m| {
                m.values()
                    .filter(|vm| match status {
                        Some(VmStatus::Running) => vm.status == VmStatus::Running && !vm.is_stale(self.stale_threshold),
                        Some(s) => vm.status == s,
                        None => true,
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .await;
        vms.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
        vms
    }

    pub async fn discover(&self, role: VmRole) -> Vec<RegisteredVm> {
        self.vms
            .with_map(|m| {
                m.values()
                    .filter(|vm| vm.role == role && vm.status == VmStatus::Running && !vm.is_stale(self.stale_threshold))
                    .cloned()
                    .collect()
            })
            .await
    }

    pub async fn heartbeat(&self, id: &str) -> CoreResult<RegisteredVm> {
        self.vms
            .mutate(|m| match m.get_mut(id) {
                Some(vm) => {
                    vm.last_seen = fleet_core::ids::now_iso();
                    Ok(vm.clone())
                }
                None => Err(CoreError::not_found(format!("vm {id} not found"))),
            })
            .await
    }

    pub async fn set_status(&self, id: &str, status: VmStatus) -> CoreResult<RegisteredVm> {
        self.vms
            .mutate(|m| match m.get_mut(id) {
                Some(vm) => {
                    vm.status = status;
                    Ok(vm.clone())
                }
                None => Err(CoreError::not_found(format!("vm {id} not found"))),
            })
            .await
    }

    pub async fn flush(&self) -> CoreResult<()> {
        self.vms.flush().await
    }
}
