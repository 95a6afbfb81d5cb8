use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted after authoritative state transitions commit.
/// Consumers (notification delivery, projections) are best-effort: a
/// dropped event never unwinds the operation that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Checkout / order events
    CheckoutCompleted {
        order_id: Uuid,
        gateway_order_ref: String,
    },
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled(Uuid),

    // Inventory events
    InventoryReserved {
        product_id: Uuid,
        quantity: i32,
        remaining: i32,
    },
    InventoryRestored {
        product_id: Uuid,
        quantity: i32,
    },
    LowStock {
        product_id: Uuid,
        remaining: i32,
        threshold: i32,
    },

    // Payment events
    PaymentCompleted {
        order_id: Uuid,
        payment_id: Uuid,
        amount: Decimal,
    },

    // Refund events
    RefundRequested {
        refund_id: Uuid,
        payment_id: Uuid,
        amount: Decimal,
    },
    RefundSettled {
        refund_id: Uuid,
        succeeded: bool,
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

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Best-effort send: failures are logged, never surfaced.
    pub async fn send_detached(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping domain event");
        }
    }
}

/// Consumes events off the channel. The notification collaborator hangs off
/// this loop; for now every event is logged.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::CheckoutCompleted {
                order_id,
                gateway_order_ref,
            } => {
                info!(order_id = %order_id, gateway_order_ref = %gateway_order_ref, "Checkout completed");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id = %order_id, %old_status, %new_status, "Order status changed");
            }
            Event::LowStock {
                product_id,
                remaining,
                threshold,
            } => {
                warn!(product_id = %product_id, remaining, threshold, "Product stock below threshold");
            }
            Event::PaymentCompleted {
                order_id, amount, ..
            } => {
                info!(order_id = %order_id, %amount, "Payment completed");
            }
            other => {
                info!(event = ?other, "Domain event");
            }
        }
    }
}

/// Builds a channel pair sized for request-path fan-out.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}
