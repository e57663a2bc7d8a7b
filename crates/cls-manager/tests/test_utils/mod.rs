//! Shared test utilities for integration tests
//!
//! A recording gateway, a store wrapper that injects registry failures, and
//! fixtures for building provisioners over a fresh registry.

#![allow(dead_code)]

use cls_common::{BackendRegion, SharedInstance};
use cls_manager::config::PolicyParameters;
use cls_manager::gateway::{CreateInstanceRequest, GatewayProvider, InstanceGateway};
use cls_manager::retry::RetryConfig;
use cls_manager::state::{
    self, ReferenceUpdate, RegistryError, RegistryStore, SqliteRegistry,
};
use cls_manager::{ClsConfig, ClsError, Deprovisioner, Provisioner};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use cls_test_utils::{test_account_id, test_runtime_id};

/// Configuration accepted by `ClsConfig::load`
pub fn sample_config_json() -> serde_json::Value {
    serde_json::json!({
        "retention_period": 7,
        "max_data_instances": 2,
        "max_ingest_instances": 2,
        "saml": {
            "admin_group": "cls-admins",
            "exchange_key": "exchange-secret",
            "roles_key": "groups",
            "idp": {
                "metadata_url": "https://idp.example.com/metadata",
                "entity_id": "idp-entity"
            },
            "sp": {
                "entity_id": "sp-entity",
                "signature_private_key": "private-key-secret"
            }
        },
        "broker_id": "broker-1",
        "service_id": "cls-service",
        "plan_id": "cls-plan",
        "service_manager": {
            "credentials": [
                {"region": "eu", "url": "https://sm.eu.example.com", "username": "eu", "password": "eu-secret"},
                {"region": "us", "url": "https://sm.us.example.com", "username": "us", "password": "us-secret"}
            ]
        }
    })
}

pub fn sample_config() -> ClsConfig {
    serde_json::from_value(sample_config_json()).unwrap()
}

pub fn policy() -> PolicyParameters {
    sample_config().policy()
}

/// Conflict retries without sleeping
pub fn fast_retry() -> RetryConfig {
    RetryConfig::immediate(10)
}

/// Fresh registry in a single-connection in-memory database
pub async fn memory_registry() -> Arc<SqliteRegistry> {
    let pool = cls_test_utils::open_test_db().await.unwrap();
    state::setup_schema(&pool).await.unwrap();
    Arc::new(SqliteRegistry::new(pool))
}

/// Registry in an on-disk database with a real connection pool
pub async fn file_registry(dir: &Path) -> Arc<SqliteRegistry> {
    let pool = state::open_db(&dir.join("registry.db")).await.unwrap();
    Arc::new(SqliteRegistry::new(pool))
}

pub fn provisioner<S: RegistryStore>(store: &Arc<S>) -> Provisioner<S> {
    Provisioner::new(Arc::clone(store), fast_retry(), policy())
}

pub fn deprovisioner<S: RegistryStore>(store: &Arc<S>) -> Deprovisioner<S> {
    Deprovisioner::new(Arc::clone(store), fast_retry())
}

/// Gateway that records calls and fails on demand
#[derive(Default)]
pub struct RecordingGateway {
    created: Mutex<Vec<CreateInstanceRequest>>,
    destroyed: Mutex<Vec<String>>,
    create_failures: AtomicUsize,
    destroy_failures: AtomicUsize,
    create_delay: Mutex<Option<Duration>>,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `n` create calls
    pub fn fail_creates(&self, n: usize) {
        self.create_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` destroy calls
    pub fn fail_destroys(&self, n: usize) {
        self.destroy_failures.store(n, Ordering::SeqCst);
    }

    pub fn delay_creates(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    pub fn created(&self) -> Vec<CreateInstanceRequest> {
        self.created.lock().unwrap().clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl InstanceGateway for RecordingGateway {
    async fn create(&self, request: &CreateInstanceRequest) -> anyhow::Result<String> {
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if take_failure(&self.create_failures) {
            anyhow::bail!("injected create failure");
        }
        self.created.lock().unwrap().push(request.clone());
        Ok(request.instance_id.clone())
    }

    async fn destroy(&self, resource_id: &str) -> anyhow::Result<()> {
        if take_failure(&self.destroy_failures) {
            anyhow::bail!("injected destroy failure");
        }
        self.destroyed.lock().unwrap().push(resource_id.to_string());
        Ok(())
    }
}

/// Cloneable handle so one recording gateway serves every region
#[derive(Clone)]
pub struct GatewayHandle(pub Arc<RecordingGateway>);

impl InstanceGateway for GatewayHandle {
    async fn create(&self, request: &CreateInstanceRequest) -> anyhow::Result<String> {
        self.0.create(request).await
    }

    async fn destroy(&self, resource_id: &str) -> anyhow::Result<()> {
        self.0.destroy(resource_id).await
    }
}

/// Provider handing out the recording gateway for configured regions
pub struct TestProvider {
    pub gateway: Arc<RecordingGateway>,
    pub regions: Vec<BackendRegion>,
    pub requested: Mutex<Vec<BackendRegion>>,
}

impl TestProvider {
    pub fn new(gateway: Arc<RecordingGateway>) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            regions: vec![BackendRegion::Eu, BackendRegion::Us],
            requested: Mutex::new(Vec::new()),
        })
    }

    pub fn only(gateway: Arc<RecordingGateway>, region: BackendRegion) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            regions: vec![region],
            requested: Mutex::new(Vec::new()),
        })
    }
}

impl GatewayProvider for TestProvider {
    type Gateway = GatewayHandle;

    fn gateway_for(&self, region: BackendRegion) -> Result<GatewayHandle, ClsError> {
        self.requested.lock().unwrap().push(region);
        if !self.regions.contains(&region) {
            return Err(cls_manager::ConfigError::MissingCredentials { region }.into());
        }
        Ok(GatewayHandle(Arc::clone(&self.gateway)))
    }
}

/// Registry operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    FindLive,
    FindById,
    Insert,
    Activate,
    AddReference,
    RemoveReference,
    Delete,
}

/// What an injected failure looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injected {
    /// Connection dropped
    Unavailable,
    /// Another writer got there first
    Conflict,
}

/// Store wrapper that fails selected operations a set number of times
pub struct FlakyStore<S> {
    inner: Arc<S>,
    failures: Mutex<HashMap<StoreOp, (Injected, usize)>>,
    calls: Mutex<HashMap<StoreOp, usize>>,
}

impl<S: RegistryStore> FlakyStore<S> {
    pub fn new(inner: Arc<S>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        })
    }

    pub fn fail(&self, op: StoreOp, kind: Injected, times: usize) {
        self.failures.lock().unwrap().insert(op, (kind, times));
    }

    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    fn check(&self, op: StoreOp, instance_id: &str) -> Result<(), RegistryError> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;

        let mut failures = self.failures.lock().unwrap();
        let Some((kind, remaining)) = failures.get_mut(&op) else {
            return Ok(());
        };
        if *remaining == 0 {
            return Ok(());
        }
        *remaining -= 1;

        Err(match kind {
            Injected::Unavailable => RegistryError::StorageUnavailable {
                op: "injected",
                source: sqlx::Error::PoolTimedOut,
            },
            Injected::Conflict => RegistryError::VersionConflict {
                instance_id: instance_id.to_string(),
                expected: 0,
                actual: Some(1),
            },
        })
    }
}

impl<S: RegistryStore> RegistryStore for FlakyStore<S> {
    async fn find_by_account(&self, account_id: &str) -> Result<Option<SharedInstance>, RegistryError> {
        self.inner.find_by_account(account_id).await
    }

    async fn find_live_by_account(
        &self,
        account_id: &str,
    ) -> Result<Option<SharedInstance>, RegistryError> {
        self.check(StoreOp::FindLive, account_id)?;
        self.inner.find_live_by_account(account_id).await
    }

    async fn find_by_id(&self, instance_id: &str) -> Result<Option<SharedInstance>, RegistryError> {
        self.check(StoreOp::FindById, instance_id)?;
        self.inner.find_by_id(instance_id).await
    }

    async fn insert(&self, instance: &SharedInstance) -> Result<(), RegistryError> {
        self.check(StoreOp::Insert, &instance.id)?;
        self.inner.insert(instance).await
    }

    async fn activate(&self, expected_version: i64, instance_id: &str) -> Result<i64, RegistryError> {
        self.check(StoreOp::Activate, instance_id)?;
        self.inner.activate(expected_version, instance_id).await
    }

    async fn add_reference(
        &self,
        expected_version: i64,
        instance_id: &str,
        runtime_instance_id: &str,
    ) -> Result<ReferenceUpdate, RegistryError> {
        self.check(StoreOp::AddReference, instance_id)?;
        self.inner
            .add_reference(expected_version, instance_id, runtime_instance_id)
            .await
    }

    async fn remove_reference(
        &self,
        expected_version: i64,
        instance_id: &str,
        runtime_instance_id: &str,
    ) -> Result<ReferenceUpdate, RegistryError> {
        self.check(StoreOp::RemoveReference, instance_id)?;
        self.inner
            .remove_reference(expected_version, instance_id, runtime_instance_id)
            .await
    }

    async fn delete(&self, instance_id: &str) -> Result<(), RegistryError> {
        self.check(StoreOp::Delete, instance_id)?;
        self.inner.delete(instance_id).await
    }

    async fn list(&self) -> Result<Vec<SharedInstance>, RegistryError> {
        self.inner.list().await
    }
}

/// Live records of an account, any status
pub async fn live_records<S: RegistryStore>(store: &S, account_id: &str) -> Vec<SharedInstance> {
    store
        .list()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.owner_account_id == account_id && r.is_live())
        .collect()
}
