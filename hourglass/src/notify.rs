//! Fire-and-forget transition events for operator and alerting consumption.

use crate::{record::SwapState, SwapId};
use async_trait::async_trait;

#[derive(Clone, Debug, PartialEq)]
pub struct SwapEvent {
    pub swap_id: SwapId,
    pub state: SwapState,
    pub detail: Option<String>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn swap_transitioned(&self, event: SwapEvent);
}

/// Default sink: every transition becomes a structured log line.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn swap_transitioned(&self, event: SwapEvent) {
        match &event.detail {
            Some(detail) => tracing::info!(
                swap_id = %event.swap_id,
                state = %event.state,
                detail = %detail,
                "swap transitioned"
            ),
            None => tracing::info!(
                swap_id = %event.swap_id,
                state = %event.state,
                "swap transitioned"
            ),
        }
    }
}
