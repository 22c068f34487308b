use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use event_relay::{
    raise, CommandHandler, DomainEvent, InboundMessage, MemoryTx, MessageConsumer,
};

// ============================================================================
// Demo Order Domain
// ============================================================================
//
// PlaceOrder (command) → OrderPlaced → ReserveInventory (consumer)
//                                    → InventoryReserved
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub quantity: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderPlaced {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub items: Vec<OrderItem>,
}

impl DomainEvent for OrderPlaced {
    fn event_type() -> &'static str {
        "OrderPlaced"
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InventoryReserved {
    pub order_id: Uuid,
    pub units: u32,
}

impl DomainEvent for InventoryReserved {
    fn event_type() -> &'static str {
        "InventoryReserved"
    }
}

#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub customer_id: Uuid,
    pub items: Vec<OrderItem>,
}

pub struct PlaceOrderHandler;

#[async_trait]
impl CommandHandler<MemoryTx> for PlaceOrderHandler {
    type Command = PlaceOrder;
    type Output = Uuid;

    fn name(&self) -> &str {
        "PlaceOrder"
    }

    async fn handle(&self, tx: &mut MemoryTx, command: PlaceOrder) -> anyhow::Result<Uuid> {
        if command.items.is_empty() {
            anyhow::bail!("Order must contain at least one item");
        }
        if command.items.iter().any(|item| item.quantity == 0) {
            anyhow::bail!("Item quantity must be positive");
        }

        let order_id = Uuid::now_v7();
        tx.put_record(
            format!("order:{order_id}"),
            serde_json::json!({
                "customer_id": command.customer_id,
                "status": "placed",
                "items": command.items,
            }),
        );

        raise(OrderPlaced {
            order_id,
            customer_id: command.customer_id,
            items: command.items,
        });

        Ok(order_id)
    }
}

pub struct ReserveInventory;

#[async_trait]
impl MessageConsumer<MemoryTx, OrderPlaced> for ReserveInventory {
    fn consumer_type(&self) -> &str {
        "ReserveInventory"
    }

    async fn consume(
        &self,
        tx: &mut MemoryTx,
        message: &InboundMessage<OrderPlaced>,
    ) -> anyhow::Result<()> {
        let order = &message.body;
        let units: u32 = order.items.iter().map(|item| item.quantity).sum();

        tx.put_record(
            format!("reservation:{}", order.order_id),
            serde_json::json!({ "units": units }),
        );
        tracing::info!(order_id = %order.order_id, units, "📦 Reserved inventory");

        raise(InventoryReserved {
            order_id: order.order_id,
            units,
        });
        Ok(())
    }
}
