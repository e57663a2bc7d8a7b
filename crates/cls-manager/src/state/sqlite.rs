//! SQLite-backed registry store

use super::crud;
use super::db::DbPool;
use super::error::RegistryError;
use super::queries;
use super::store::RegistryStore;
use super::types::ReferenceUpdate;
use cls_common::SharedInstance;

/// Registry store on top of a SQLite connection pool
#[derive(Debug, Clone)]
pub struct SqliteRegistry {
    pool: DbPool,
}

impl SqliteRegistry {
    /// Wrap a pool whose schema is already set up
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl RegistryStore for SqliteRegistry {
    async fn find_by_account(&self, account_id: &str) -> Result<Option<SharedInstance>, RegistryError> {
        queries::get_active_by_account(&self.pool, account_id).await
    }

    async fn find_live_by_account(
        &self,
        account_id: &str,
    ) -> Result<Option<SharedInstance>, RegistryError> {
        queries::get_live_by_account(&self.pool, account_id).await
    }

    async fn find_by_id(&self, instance_id: &str) -> Result<Option<SharedInstance>, RegistryError> {
        queries::get_by_id(&self.pool, instance_id).await
    }

    async fn insert(&self, instance: &SharedInstance) -> Result<(), RegistryError> {
        crud::insert_instance(&self.pool, instance).await
    }

    async fn activate(&self, expected_version: i64, instance_id: &str) -> Result<i64, RegistryError> {
        crud::activate_instance(&self.pool, expected_version, instance_id).await
    }

    async fn add_reference(
        &self,
        expected_version: i64,
        instance_id: &str,
        runtime_instance_id: &str,
    ) -> Result<ReferenceUpdate, RegistryError> {
        crud::add_reference(&self.pool, expected_version, instance_id, runtime_instance_id).await
    }

    async fn remove_reference(
        &self,
        expected_version: i64,
        instance_id: &str,
        runtime_instance_id: &str,
    ) -> Result<ReferenceUpdate, RegistryError> {
        crud::remove_reference(&self.pool, expected_version, instance_id, runtime_instance_id)
            .await
    }

    async fn delete(&self, instance_id: &str) -> Result<(), RegistryError> {
        crud::delete_instance(&self.pool, instance_id).await
    }

    async fn list(&self) -> Result<Vec<SharedInstance>, RegistryError> {
        queries::get_all(&self.pool).await
    }
}
