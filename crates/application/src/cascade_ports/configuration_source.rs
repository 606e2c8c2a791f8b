use async_trait::async_trait;
use cascade_core::AppResult;
use cascade_domain::CascadeConfiguration;

/// Supplier of parsed cascade configurations.
#[async_trait]
pub trait CascadeConfigurationSource: Send + Sync {
    /// Lists every known configuration in evaluation order.
    async fn list_configurations(&self) -> AppResult<Vec<CascadeConfiguration>>;
}
