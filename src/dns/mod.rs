pub mod route53;

use async_trait::async_trait;

/// CRUD contract against a hosted DNS zone, plus the change-status polling
/// the propagation wait is built on. The challenge performer only ever talks
/// to this trait; the cloud API binding is a leaf implementation.
#[async_trait]
pub trait ZoneApi: Send + Sync {
    /// Creates or replaces a TXT record. Returns an opaque change id usable
    /// with `change_status`.
    async fn upsert_txt(&self, record_name: &str, value: &str, ttl: i64)
        -> anyhow::Result<String>;

    /// Reads the first TXT value at `record_name`, unquoted.
    async fn read_txt(&self, record_name: &str) -> anyhow::Result<String>;

    /// Deletes a TXT record. The value and TTL must match the record as
    /// created. Returns a change id.
    async fn delete_txt(&self, record_name: &str, value: &str, ttl: i64)
        -> anyhow::Result<String>;

    async fn change_status(&self, change_id: &str) -> anyhow::Result<ZoneChangeStatus>;
}

/// Provider-reported propagation state of a zone change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneChangeStatus {
    Pending,
    InSync,
}
