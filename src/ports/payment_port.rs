//! Payment processor port trait.

use async_trait::async_trait;

use crate::domain::error::QuantdeskError;
use crate::domain::subscription::Tier;

/// Everything needed to open a hosted checkout page for one tier.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub customer_id: String,
    pub user_id: i64,
    pub tier: Tier,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentPort: Send + Sync {
    /// Returns the processor's customer id.
    async fn create_customer(&self, email: &str, user_id: i64) -> Result<String, QuantdeskError>;

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, QuantdeskError>;

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), QuantdeskError>;
}
