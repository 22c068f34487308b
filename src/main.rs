use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use event_relay::events::set_capture_policy;
use event_relay::{
    raise, EventSerializer, IdempotentConsumer, InMemoryBus, InMemoryStore, InlineRelay, Outbox,
    OutboxJanitor, OutboxStore, RelayConfig, RelayHost, RelayMetrics, RelayWorker,
};

mod orders;

use orders::{
    InventoryReserved, OrderItem, OrderPlaced, PlaceOrder, PlaceOrderHandler, ReserveInventory,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO, debug for this crate; override with RUST_LOG.
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,event_relay=debug")),
        )
        .init();

    tracing::info!("🚀 Starting domain event relay demo");

    // === 1. Configuration and metrics ===
    let config = RelayConfig::from_env()?;
    set_capture_policy(config.capture_policy);
    let metrics = Arc::new(RelayMetrics::new()?);

    // === 2. Wiring ===
    let serializer = EventSerializer::new()
        .with::<OrderPlaced>()?
        .with::<InventoryReserved>()?;
    tracing::info!(event_types = ?serializer.registered_types(), "Registered event types");

    let store = Arc::new(InMemoryStore::new());
    let bus = Arc::new(InMemoryBus::new());
    let outbox = Outbox::new(store.clone(), Arc::new(serializer)).with_metrics(metrics.clone());
    let relay = InlineRelay::new(outbox.clone(), bus.clone());
    let inbox = IdempotentConsumer::new(relay.clone());

    // === 3. Command with immediate publish ===
    let order_id = relay
        .dispatch(
            &PlaceOrderHandler,
            PlaceOrder {
                customer_id: Uuid::new_v4(),
                items: vec![
                    OrderItem {
                        product_id: Uuid::new_v4(),
                        quantity: 2,
                    },
                    OrderItem {
                        product_id: Uuid::new_v4(),
                        quantity: 1,
                    },
                ],
            },
        )
        .await?;
    tracing::info!(order_id = %order_id, "✅ Order placed");

    // === 4. Redelivery is filtered by the inbox ===
    let delivered = bus
        .published()
        .await
        .iter()
        .find_map(|message| message.to_inbound::<OrderPlaced>());
    if let Some(message) = delivered {
        for attempt in 1..=2 {
            let outcome = inbox.handle(&ReserveInventory, &message).await?;
            tracing::info!(attempt, outcome = ?outcome, "Delivered OrderPlaced to ReserveInventory");
        }
    }

    // === 5. Rejected command leaves nothing behind ===
    if let Err(e) = relay
        .dispatch(
            &PlaceOrderHandler,
            PlaceOrder {
                customer_id: Uuid::new_v4(),
                items: vec![],
            },
        )
        .await
    {
        tracing::warn!(error = %e, "Command rejected, no events recorded");
    }

    // Raised outside any operation: dropped and reported.
    raise(InventoryReserved {
        order_id,
        units: 0,
    });

    // === 6. Bus outage, then catch-up by the relay worker ===
    bus.set_failing(true);
    let stranded = relay
        .dispatch(
            &PlaceOrderHandler,
            PlaceOrder {
                customer_id: Uuid::new_v4(),
                items: vec![OrderItem {
                    product_id: Uuid::new_v4(),
                    quantity: 5,
                }],
            },
        )
        .await?;
    let unpublished = store.count_unpublished().await?;
    tracing::info!(
        order_id = %stranded,
        unpublished,
        "⚠️  Bus down, order committed with its events unpublished"
    );
    bus.set_failing(false);

    let host = RelayHost::spawn(
        Arc::new(RelayWorker::from_config(outbox.clone(), bus.clone(), &config)),
        Arc::new(OutboxJanitor::from_config(outbox, &config)),
        &config,
    );

    tracing::info!("⏳ Waiting for the relay worker to catch up...");
    for _ in 0..50 {
        if store.count_unpublished().await? == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    host.shutdown().await;

    let published = bus.published_count().await;
    let unpublished = store.count_unpublished().await?;
    tracing::info!(
        published,
        unpublished,
        "🎉 Demo complete!"
    );
    let exposition = metrics.render()?;
    tracing::debug!("\n{}", exposition);

    Ok(())
}
