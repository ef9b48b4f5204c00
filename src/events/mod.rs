use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the services. Consumed in-process by the spawned
/// processor; fire-and-forget from the emitting side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        provider: String,
        final_amount: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        from: String,
        to: String,
    },
    PaymentConfirmed {
        order_id: Uuid,
        user_id: Uuid,
    },
    RefundConfirmed {
        order_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
    },
    MembershipExtended {
        user_id: Uuid,
        plan_id: Uuid,
        new_expiry: DateTime<Utc>,
    },
    MembershipCancelled {
        user_id: Uuid,
    },
    MembershipReverted {
        user_id: Uuid,
        plan_id: Uuid,
        expiry: DateTime<Utc>,
    },
    CouponApplied {
        coupon_id: Uuid,
        order_id: Uuid,
        discount_amount: Decimal,
    },
    RiskAssessed {
        user_id: Uuid,
        allowed: bool,
        level: String,
        reasons: Vec<String>,
    },
    RenewalChargeInitiated {
        subscription_id: Uuid,
        order_id: Uuid,
    },
    RenewalReminder {
        subscription_id: Uuid,
        user_id: Uuid,
        due: DateTime<Utc>,
    },
    RenewalSweepCompleted {
        processed: u32,
        successful: u32,
        failed: u32,
    },
    /// A webhook tried to move an order backward; absorbed, recorded here.
    StaleWebhookIgnored {
        order_id: Uuid,
        current: String,
        reported: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event; a full or closed channel is logged, never surfaced.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!(error = %e, "failed to enqueue event");
        }
    }
}

/// Background consumer: structured-logs every event. The audit trail for
/// risk decisions and absorbed stale webhooks lives here.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::RiskAssessed {
                user_id,
                allowed,
                level,
                reasons,
            } => {
                info!(
                    user_id = %user_id,
                    allowed = allowed,
                    level = %level,
                    reasons = ?reasons,
                    "risk assessment"
                );
            }
            Event::StaleWebhookIgnored {
                order_id,
                current,
                reported,
            } => {
                warn!(
                    order_id = %order_id,
                    current = %current,
                    reported = %reported,
                    "stale webhook ignored"
                );
            }
            other => {
                info!(event = ?other, "domain event");
            }
        }
    }
    info!("event channel closed; processor exiting");
}
