//! Provisioning and deprovisioning steps driven the way a workflow engine
//! drives them: run, inspect the result, run again when asked to retry.

mod test_utils;

use cls_common::BackendRegion;
use cls_manager::config::StepConfig;
use cls_manager::state::{RegistryStore, SqliteRegistry};
use cls_manager::steps::{
    ClsOperation, DeprovisionStep, GlobalAccountId, ProvisionStep, RuntimeInstanceId, StepResult,
};
use std::sync::Arc;
use std::time::Duration;
use test_utils::{
    RecordingGateway, TestProvider, deprovisioner, live_records, memory_registry, provisioner,
    test_account_id, test_runtime_id,
};

fn step_config() -> StepConfig {
    StepConfig {
        retry_interval_secs: 3,
        timeout_secs: 5,
    }
}

fn operation(account: &str) -> ClsOperation {
    ClsOperation::new(
        RuntimeInstanceId::new(test_runtime_id()),
        GlobalAccountId::new(account),
    )
}

fn steps(
    store: &Arc<SqliteRegistry>,
    provider: &Arc<TestProvider>,
    config: StepConfig,
) -> (
    ProvisionStep<SqliteRegistry, TestProvider>,
    DeprovisionStep<SqliteRegistry, TestProvider>,
) {
    (
        ProvisionStep::new(provisioner(store), Arc::clone(provider), config),
        DeprovisionStep::new(deprovisioner(store), Arc::clone(provider), config),
    )
}

#[tokio::test]
async fn test_step_names() {
    let store = memory_registry().await;
    let provider = TestProvider::new(RecordingGateway::new());
    let (provision, deprovision) = steps(&store, &provider, step_config());

    assert_eq!(provision.name(), "provision_cls");
    assert_eq!(deprovision.name(), "deprovision_cls");
}

#[tokio::test]
async fn test_provision_step_records_instance() {
    let store = memory_registry().await;
    let gateway = RecordingGateway::new();
    let provider = TestProvider::new(Arc::clone(&gateway));
    let (provision, _) = steps(&store, &provider, step_config());
    let account = test_account_id();

    let result = provision.run(operation(&account).with_region("eastus")).await;

    let StepResult::Completed(op) = result else {
        panic!("expected completion, got {result:?}");
    };
    assert!(op.cls.provisioned);
    assert_eq!(op.cls.region, Some(BackendRegion::Us));
    let instance_id = op.cls.instance_id.clone().unwrap();

    let created = gateway.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].instance_id, instance_id);
    assert_eq!(created[0].region, BackendRegion::Us);
    assert_eq!(*provider.requested.lock().unwrap(), vec![BackendRegion::Us]);

    let live = live_records(store.as_ref(), &account).await;
    assert_eq!(live.len(), 1);
    assert!(live[0].is_referenced_by(&op.runtime_instance_id));
}

#[tokio::test]
async fn test_provision_step_without_region_uses_default() {
    let store = memory_registry().await;
    let gateway = RecordingGateway::new();
    let provider = TestProvider::new(Arc::clone(&gateway));
    let (provision, _) = steps(&store, &provider, step_config());

    let result = provision.run(operation(&test_account_id())).await;

    assert!(result.is_completed());
    assert_eq!(result.operation().cls.region, Some(BackendRegion::Eu));
}

#[tokio::test]
async fn test_provision_step_is_noop_when_already_provisioned() {
    let store = memory_registry().await;
    let gateway = RecordingGateway::new();
    let provider = TestProvider::new(Arc::clone(&gateway));
    let (provision, _) = steps(&store, &provider, step_config());

    let first = provision.run(operation(&test_account_id())).await;
    let op = first.operation().clone();

    let second = provision.run(op.clone()).await;

    assert_eq!(second, StepResult::Completed(op));
    assert_eq!(gateway.created().len(), 1);
    assert_eq!(provider.requested.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_provision_step_fails_on_unsupported_region() {
    let store = memory_registry().await;
    let gateway = RecordingGateway::new();
    let provider = TestProvider::new(Arc::clone(&gateway));
    let (provision, _) = steps(&store, &provider, step_config());
    let account = test_account_id();

    let result = provision.run(operation(&account).with_region("antarctica")).await;

    let StepResult::Failed { op, reason } = result else {
        panic!("expected failure, got {result:?}");
    };
    assert!(reason.contains("antarctica"), "{reason}");
    assert!(!op.cls.provisioned);
    assert!(gateway.created().is_empty());
    assert!(live_records(store.as_ref(), &account).await.is_empty());
}

#[tokio::test]
async fn test_provision_step_fails_without_credentials() {
    let store = memory_registry().await;
    let gateway = RecordingGateway::new();
    let provider = TestProvider::only(Arc::clone(&gateway), BackendRegion::Eu);
    let (provision, _) = steps(&store, &provider, step_config());

    let result = provision.run(operation(&test_account_id()).with_region("eastus")).await;

    let StepResult::Failed { reason, .. } = result else {
        panic!("expected failure, got {result:?}");
    };
    assert!(reason.contains("us"), "{reason}");
    assert!(gateway.created().is_empty());
}

#[tokio::test]
async fn test_provision_step_retries_after_gateway_failure() {
    let store = memory_registry().await;
    let gateway = RecordingGateway::new();
    gateway.fail_creates(1);
    let provider = TestProvider::new(Arc::clone(&gateway));
    let (provision, _) = steps(&store, &provider, step_config());
    let account = test_account_id();

    let result = provision.run(operation(&account)).await;

    let StepResult::Retry { op, after, reason } = result else {
        panic!("expected retry, got {result:?}");
    };
    assert_eq!(after, Duration::from_secs(3));
    assert!(reason.contains("injected create failure"), "{reason}");
    assert!(!op.cls.provisioned);

    // The pending record is picked up again by the same runtime
    let pending = live_records(store.as_ref(), &account).await;
    assert_eq!(pending.len(), 1);
    assert!(!pending[0].is_active());

    let result = provision.run(op).await;
    assert!(result.is_completed());
    assert_eq!(
        result.operation().cls.instance_id.as_deref(),
        Some(pending[0].id.as_str())
    );
    assert_eq!(gateway.created().len(), 1);
}

#[tokio::test]
async fn test_provision_step_retries_after_timeout() {
    let store = memory_registry().await;
    let gateway = RecordingGateway::new();
    gateway.delay_creates(Duration::from_millis(1500));
    let provider = TestProvider::new(Arc::clone(&gateway));
    let config = StepConfig {
        retry_interval_secs: 1,
        timeout_secs: 1,
    };
    let (provision, _) = steps(&store, &provider, config);

    let result = provision.run(operation(&test_account_id())).await;

    let StepResult::Retry { op, reason, .. } = result else {
        panic!("expected retry, got {result:?}");
    };
    assert!(reason.contains("did not finish"), "{reason}");
    assert!(gateway.created().is_empty());

    gateway.delay_creates(Duration::ZERO);
    let result = provision.run(op).await;
    assert!(result.is_completed());
    assert_eq!(gateway.created().len(), 1);
}

#[tokio::test]
async fn test_second_runtime_retries_while_first_is_creating() {
    let store = memory_registry().await;
    let gateway = RecordingGateway::new();
    gateway.fail_creates(1);
    let provider = TestProvider::new(Arc::clone(&gateway));
    let (provision, _) = steps(&store, &provider, step_config());
    let account = test_account_id();

    let first = provision.run(operation(&account)).await;
    assert!(matches!(first, StepResult::Retry { .. }));

    let second = provision.run(operation(&account)).await;
    let StepResult::Retry { ref reason, .. } = second else {
        panic!("expected retry, got {second:?}");
    };
    assert!(reason.contains("still being created"), "{reason}");

    let first = provision.run(first.operation().clone()).await;
    assert!(first.is_completed());
    let second = provision.run(second.operation().clone()).await;
    assert!(second.is_completed());
    assert_eq!(
        first.operation().cls.instance_id,
        second.operation().cls.instance_id
    );
}

#[tokio::test]
async fn test_deprovision_step_without_instance_is_noop() {
    let store = memory_registry().await;
    let gateway = RecordingGateway::new();
    let provider = TestProvider::new(Arc::clone(&gateway));
    let (_, deprovision) = steps(&store, &provider, step_config());

    let op = operation(&test_account_id());
    let result = deprovision.run(op.clone()).await;

    assert_eq!(result, StepResult::Completed(op));
    assert!(provider.requested.lock().unwrap().is_empty());
    assert!(gateway.destroyed().is_empty());
}

#[tokio::test]
async fn test_steps_share_and_release_instance() {
    let store = memory_registry().await;
    let gateway = RecordingGateway::new();
    let provider = TestProvider::new(Arc::clone(&gateway));
    let (provision, deprovision) = steps(&store, &provider, step_config());
    let account = test_account_id();

    let first = provision.run(operation(&account).with_region("westeurope")).await;
    let second = provision.run(operation(&account).with_region("northeurope")).await;
    let instance_id = first.operation().cls.instance_id.clone().unwrap();
    assert_eq!(second.operation().cls.instance_id.as_deref(), Some(instance_id.as_str()));

    let released = deprovision.run(first.operation().clone()).await;
    let StepResult::Completed(op) = released else {
        panic!("expected completion, got {released:?}");
    };
    assert!(!op.cls.provisioned);
    assert!(gateway.destroyed().is_empty());

    let released = deprovision.run(second.operation().clone()).await;
    assert!(released.is_completed());
    assert_eq!(gateway.destroyed(), vec![instance_id.clone()]);
    assert!(store.find_by_id(&instance_id).await.unwrap().is_none());

    // Replaying a completed release is harmless
    let replay = deprovision.run(second.operation().clone()).await;
    assert!(replay.is_completed());
    assert_eq!(gateway.destroyed().len(), 1);
}

#[tokio::test]
async fn test_deprovision_step_falls_back_to_runtime_region() {
    let store = memory_registry().await;
    let gateway = RecordingGateway::new();
    let provider = TestProvider::new(Arc::clone(&gateway));
    let (provision, deprovision) = steps(&store, &provider, step_config());

    let provisioned = provision
        .run(operation(&test_account_id()).with_region("centralus"))
        .await;
    let mut op = provisioned.operation().clone();
    op.cls.region = None;

    let result = deprovision.run(op).await;

    assert!(result.is_completed());
    assert_eq!(
        *provider.requested.lock().unwrap(),
        vec![BackendRegion::Us, BackendRegion::Us]
    );
    assert_eq!(gateway.destroyed().len(), 1);
}

#[tokio::test]
async fn test_deprovision_step_retries_after_destroy_failure() {
    let store = memory_registry().await;
    let gateway = RecordingGateway::new();
    gateway.fail_destroys(1);
    let provider = TestProvider::new(Arc::clone(&gateway));
    let (provision, deprovision) = steps(&store, &provider, step_config());

    let provisioned = provision.run(operation(&test_account_id())).await;
    let op = provisioned.operation().clone();
    let instance_id = op.cls.instance_id.clone().unwrap();

    let result = deprovision.run(op).await;
    let StepResult::Retry { op, .. } = result else {
        panic!("expected retry, got {result:?}");
    };
    assert!(store.find_by_id(&instance_id).await.unwrap().is_some());

    let result = deprovision.run(op).await;
    assert!(result.is_completed());
    assert_eq!(gateway.destroyed(), vec![instance_id.clone()]);
    assert!(store.find_by_id(&instance_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_provision_does_not_block_account_after_teardown() {
    let store = memory_registry().await;
    let gateway = RecordingGateway::new();
    gateway.fail_creates(100);
    let provider = TestProvider::new(Arc::clone(&gateway));
    let (provision, deprovision) = steps(&store, &provider, step_config());
    let account = test_account_id();

    let failed = provision.run(operation(&account).with_region("eastus")).await;
    let StepResult::Retry { op, .. } = failed else {
        panic!("expected retry, got {failed:?}");
    };
    assert_eq!(op.cls.instance_id, None);
    let pending = live_records(store.as_ref(), &account).await;
    assert_eq!(pending.len(), 1);

    // The runtime is torn down without its provision ever completing
    let released = deprovision.run(op).await;
    let StepResult::Completed(op) = released else {
        panic!("expected completion, got {released:?}");
    };
    assert_eq!(op.cls.instance_id.as_deref(), Some(pending[0].id.as_str()));
    assert_eq!(op.cls.region, Some(BackendRegion::Us));
    assert_eq!(gateway.destroyed(), vec![pending[0].id.clone()]);
    assert!(live_records(store.as_ref(), &account).await.is_empty());
    assert!(store.find_by_id(&pending[0].id).await.unwrap().is_none());

    gateway.fail_creates(0);
    let second = provision.run(operation(&account)).await;
    assert!(second.is_completed(), "{second:?}");
    assert_ne!(
        second.operation().cls.instance_id.as_deref(),
        Some(pending[0].id.as_str())
    );
    assert_eq!(gateway.created().len(), 1);
}

#[tokio::test]
async fn test_deprovision_step_recovers_reference_on_shared_instance() {
    let store = memory_registry().await;
    let gateway = RecordingGateway::new();
    let provider = TestProvider::new(Arc::clone(&gateway));
    let (provision, deprovision) = steps(&store, &provider, step_config());
    let account = test_account_id();

    let first = provision.run(operation(&account)).await;
    let second = provision.run(operation(&account)).await;
    assert!(first.is_completed() && second.is_completed());

    // The second operation lost its recorded instance id
    let mut op = second.operation().clone();
    op.cls.instance_id = None;
    op.cls.region = None;

    let released = deprovision.run(op).await;
    assert!(released.is_completed());
    assert!(gateway.destroyed().is_empty());

    let live = live_records(store.as_ref(), &account).await;
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].reference_count(), 1);
    assert!(live[0].is_referenced_by(&first.operation().runtime_instance_id));
}

#[tokio::test]
async fn test_deprovision_step_retry_keeps_recovered_instance() {
    let store = memory_registry().await;
    let gateway = RecordingGateway::new();
    gateway.fail_creates(1);
    gateway.fail_destroys(1);
    let provider = TestProvider::new(Arc::clone(&gateway));
    let (provision, deprovision) = steps(&store, &provider, step_config());
    let account = test_account_id();

    let failed = provision.run(operation(&account)).await;
    let pending_id = live_records(store.as_ref(), &account).await[0].id.clone();

    let result = deprovision.run(failed.operation().clone()).await;
    let StepResult::Retry { op, .. } = result else {
        panic!("expected retry, got {result:?}");
    };
    // The reference is gone, so only the operation still knows the record
    assert_eq!(op.cls.instance_id.as_deref(), Some(pending_id.as_str()));
    assert!(live_records(store.as_ref(), &account).await.is_empty());

    let result = deprovision.run(op).await;
    assert!(result.is_completed());
    assert_eq!(gateway.destroyed(), vec![pending_id.clone()]);
    assert!(store.find_by_id(&pending_id).await.unwrap().is_none());
}
