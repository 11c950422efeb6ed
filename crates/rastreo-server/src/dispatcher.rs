use std::sync::Arc;

use rastreo_config::OutboxRuntimeConfig;
use rastreo_hub::TrackingHub;
use rastreo_store::TrackingStore;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, warn};

/// Drains the outbox into the hub: publish first, then mark dispatched.
/// Crashing between the two replays the entry on the next pass, so room
/// subscribers get at-least-once delivery for every committed write.
///
/// Wakes on the write-path notify or on the poll interval, whichever comes
/// first; the interval also covers entries left behind by a previous
/// process.
pub fn spawn(
    store: Arc<Mutex<TrackingStore>>,
    hub: Arc<TrackingHub>,
    notify: Arc<Notify>,
    config: OutboxRuntimeConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let batch = {
                let store = store.lock().await;
                store.undispatched(config.batch_size)
            };

            match batch {
                Ok(entries) if !entries.is_empty() => {
                    for entry in entries {
                        hub.publish(entry.order_id.clone(), entry.event.clone());
                        let mut store = store.lock().await;
                        if let Err(err) = store.mark_dispatched(entry.entry_id) {
                            warn!(entry = entry.entry_id, %err, "failed to mark outbox entry dispatched");
                        }
                    }
                    // Keep draining until the outbox is empty.
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    error!(%err, "outbox read failed");
                }
            }

            let _ = timeout(config.poll_interval, notify.notified()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rastreo_config::OutboxRuntimeConfig;
    use rastreo_hub::TrackingHub;
    use rastreo_protocol::ids::{CustomerId, OrderId};
    use rastreo_protocol::order::OrderStatus;
    use rastreo_protocol::wire::RoomEvent;
    use rastreo_store::{NewOrder, TrackingStore};
    use tokio::sync::{Mutex, Notify};
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(2);

    fn test_outbox_config() -> OutboxRuntimeConfig {
        OutboxRuntimeConfig {
            poll_interval: Duration::from_millis(20),
            batch_size: 16,
        }
    }

    fn store_with_order(order_id: &str) -> TrackingStore {
        let mut store = TrackingStore::in_memory().expect("open store");
        store
            .create_order(NewOrder {
                id: OrderId::new(order_id),
                customer_id: CustomerId::new("CLI-1"),
            })
            .expect("create order");
        store
    }

    #[tokio::test]
    async fn entries_committed_before_startup_are_replayed_into_the_hub() {
        let mut store = store_with_order("ORD1");
        store
            .update_status(&OrderId::new("ORD1"), OrderStatus::Enviado, None)
            .expect("update status");

        let store = Arc::new(Mutex::new(store));
        let hub = Arc::new(TrackingHub::default());
        let notify = Arc::new(Notify::new());
        let mut subscription = hub.subscribe(OrderId::new("ORD1"));

        // The write predates the dispatcher, as after a crash between
        // commit and emit.
        let dispatcher = super::spawn(
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&notify),
            test_outbox_config(),
        );

        let envelope = timeout(TEST_TIMEOUT, subscription.next_event())
            .await
            .expect("replay timeout")
            .expect("replayed event should arrive");
        match envelope.event {
            RoomEvent::TrackingUpdated { estado_pedido, .. } => {
                assert_eq!(estado_pedido, Some(OrderStatus::Enviado));
            }
            other => panic!("expected trackingUpdated, got {other:?}"),
        }

        // The entry is marked once emitted and does not replay again.
        let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
        loop {
            let pending = store.lock().await.undispatched(16).expect("undispatched");
            if pending.is_empty() {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for the outbox to drain"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        dispatcher.abort();
    }

    #[tokio::test]
    async fn notify_drains_writes_committed_while_running() {
        let store = Arc::new(Mutex::new(store_with_order("ORD2")));
        let hub = Arc::new(TrackingHub::default());
        let notify = Arc::new(Notify::new());
        let mut subscription = hub.subscribe(OrderId::new("ORD2"));
        let dispatcher = super::spawn(
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&notify),
            test_outbox_config(),
        );

        {
            let mut store = store.lock().await;
            store
                .update_status(&OrderId::new("ORD2"), OrderStatus::Procesando, None)
                .expect("update status");
        }
        notify.notify_one();

        let envelope = timeout(TEST_TIMEOUT, subscription.next_event())
            .await
            .expect("dispatch timeout")
            .expect("event should arrive");
        assert_eq!(envelope.order_id.as_str(), "ORD2");
        dispatcher.abort();
    }
}
