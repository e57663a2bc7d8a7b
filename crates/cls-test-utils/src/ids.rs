//! Identifier helpers for tests
//!
//! Every call returns a fresh identifier so tests sharing a database never
//! collide on the unique account or reference constraints.

use uuid::Uuid;

/// Generate a unique global account ID.
///
/// # Example
///
/// ```
/// use cls_test_utils::ids::test_account_id;
///
/// let account = test_account_id();
/// assert!(account.starts_with("ga-"));
/// ```
pub fn test_account_id() -> String {
    format!("ga-{}", Uuid::now_v7())
}

/// Generate a unique runtime (SKR) instance ID.
///
/// # Example
///
/// ```
/// use cls_test_utils::ids::test_runtime_id;
///
/// assert_ne!(test_runtime_id(), test_runtime_id());
/// ```
pub fn test_runtime_id() -> String {
    format!("skr-{}", Uuid::now_v7())
}
