use crate::domain::ports::{OrderStatusNotifier, PaymentConfirmed};
use crate::error::Result;
use async_trait::async_trait;
use tracing::info;

/// Records payment confirmations in the log stream.
///
/// Stands in for the order-service callback when none is wired.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl OrderStatusNotifier for TracingNotifier {
    async fn payment_confirmed(&self, event: &PaymentConfirmed) -> Result<()> {
        info!(
            order_id = %event.order_id,
            payment_order_id = %event.payment_order_id,
            note = %event.note,
            "PAYMENT_CONFIRMED"
        );
        Ok(())
    }
}
