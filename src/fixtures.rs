//! Shared test events, handlers and wiring.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{raise, DomainEvent, EventMetadata, EventSerializer, RaisedEvent};
use crate::messaging::{InMemoryBus, InboundMessage};
use crate::pipeline::{CommandHandler, InlineRelay, MessageConsumer};
use crate::store::{InMemoryStore, MemoryTx, Outbox};

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: Uuid,
    pub total_cents: i64,
}

impl DomainEvent for OrderPlaced {
    fn event_type() -> &'static str {
        "OrderPlaced"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: Uuid,
    pub carrier: String,
}

impl DomainEvent for OrderShipped {
    fn event_type() -> &'static str {
        "OrderShipped"
    }
}

/// Event whose encoding always fails.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Unserializable {}

impl Serialize for Unserializable {
    fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom("refusing to serialize"))
    }
}

impl DomainEvent for Unserializable {
    fn event_type() -> &'static str {
        "Unserializable"
    }
}

pub fn serializer() -> EventSerializer {
    EventSerializer::new()
        .with::<OrderPlaced>()
        .and_then(|s| s.with::<OrderShipped>())
        .unwrap()
}

/// Decodable `OrderPlaced` outbox row.
pub fn raised_row(date_occurred: DateTime<Utc>, was_published: bool) -> RaisedEvent {
    let event = OrderPlaced {
        order_id: Uuid::new_v4(),
        total_cents: 100,
    };
    RaisedEvent {
        id: Uuid::now_v7(),
        date_occurred,
        event_type: OrderPlaced::event_type().to_string(),
        payload: serde_json::to_string(&event).unwrap(),
        metadata: EventMetadata::new(None, Some(Uuid::new_v4())),
        was_published,
    }
}

pub fn relay() -> (Arc<InMemoryStore>, Arc<InMemoryBus>, InlineRelay<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let outbox = Outbox::new(store.clone(), Arc::new(serializer()));
    let relay = InlineRelay::new(outbox, bus.clone());
    (store, bus, relay)
}

// ============================================================================
// Command handler
// ============================================================================

#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub order_id: Uuid,
    pub total_cents: i64,
}

/// Writes `order:{id}`, raises `OrderPlaced` then one `OrderShipped` per
/// shipment, and optionally fails or raises an unserializable event.
#[derive(Default)]
pub struct PlaceOrderHandler {
    shipments: usize,
    fail: bool,
    poison: bool,
    invocations: AtomicUsize,
}

impl PlaceOrderHandler {
    pub fn with_shipments(mut self, shipments: usize) -> Self {
        self.shipments = shipments;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn poisoned(mut self) -> Self {
        self.poison = true;
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandHandler<MemoryTx> for PlaceOrderHandler {
    type Command = PlaceOrder;
    type Output = Uuid;

    fn name(&self) -> &str {
        "PlaceOrder"
    }

    async fn handle(&self, tx: &mut MemoryTx, command: PlaceOrder) -> anyhow::Result<Uuid> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        tx.put_record(
            format!("order:{}", command.order_id),
            serde_json::json!({ "total_cents": command.total_cents }),
        );
        raise(OrderPlaced {
            order_id: command.order_id,
            total_cents: command.total_cents,
        });
        for n in 0..self.shipments {
            tokio::task::yield_now().await;
            raise(OrderShipped {
                order_id: command.order_id,
                carrier: format!("carrier-{n}"),
            });
        }
        if self.poison {
            raise(Unserializable::default());
        }
        if self.fail {
            anyhow::bail!("payment declined for order {}", command.order_id);
        }

        Ok(command.order_id)
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// Reacts to `OrderPlaced` by writing `shipment:{order_id}` and raising
/// `OrderShipped`.
pub struct ShipOnPlaced {
    name: String,
    fail: AtomicBool,
    invocations: AtomicUsize,
}

impl Default for ShipOnPlaced {
    fn default() -> Self {
        Self::named("ShipOnPlaced")
    }
}

impl ShipOnPlaced {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: AtomicBool::new(false),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageConsumer<MemoryTx, OrderPlaced> for ShipOnPlaced {
    fn consumer_type(&self) -> &str {
        &self.name
    }

    async fn consume(
        &self,
        tx: &mut MemoryTx,
        message: &InboundMessage<OrderPlaced>,
    ) -> anyhow::Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let order_id = message.body.order_id;
        tx.put_record(format!("shipment:{order_id}"), serde_json::json!("ups"));
        raise(OrderShipped {
            order_id,
            carrier: "ups".to_string(),
        });

        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("warehouse offline");
        }
        Ok(())
    }
}
