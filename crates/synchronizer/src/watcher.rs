use crate::metrics::{L1_SUBSCRIPTION_ATTEMPTS, L1_SUBSCRIPTION_TIMEOUTS};
use crate::{Error, EventStream, L1Client, RawEvent};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::*;

/// What the watcher observed while waiting on a subscription.
#[derive(Debug)]
pub enum WatchOutcome {
    Event(RawEvent),
    /// The subscription failed and has to be re-established.
    SubscriptionError(Error),
    /// No event arrived within the subscription timeout. The subscription is
    /// still usable.
    TimedOut,
    Stopped,
}

/// An established event subscription. Dropping it releases the
/// underlying L1 subscription.
pub struct Subscription {
    events: EventStream,
    start_block: u64,
}

impl Subscription {
    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    pub fn unsubscribe(self) {
        debug!("Releasing subscription started at block {}", self.start_block);
    }
}

/// Owns the lifecycle of the `SequenceBatches` subscription.
pub struct EventWatcher<C> {
    client: Arc<C>,
    retry_interval: Duration,
    subscription_timeout: Duration,
}

impl<C: L1Client> EventWatcher<C> {
    pub fn new(client: Arc<C>, retry_interval: Duration, subscription_timeout: Duration) -> Self {
        Self {
            client,
            retry_interval,
            subscription_timeout,
        }
    }

    /// Subscribe from `start_block`, retrying every `retry_interval` until it
    /// works. Returns `None` once `stop` is cancelled.
    pub async fn subscribe(&self, start_block: u64, stop: &CancellationToken) -> Option<Subscription> {
        loop {
            if stop.is_cancelled() {
                return None;
            }

            let attempt = tokio::select! {
                biased;

                _ = stop.cancelled() => return None,
                attempt = tokio::time::timeout(
                    self.subscription_timeout,
                    self.client.watch_sequence_batches(start_block),
                ) => attempt.unwrap_or(Err(Error::Timeout {
                    operation: "subscribe",
                    after: self.subscription_timeout,
                })),
            };

            match attempt {
                Ok(events) => {
                    L1_SUBSCRIPTION_ATTEMPTS.with_label_values(&["success"]).inc();
                    info!("Subscribed to sequence batch events from block {start_block}");
                    return Some(Subscription {
                        events,
                        start_block,
                    });
                }
                Err(err) => {
                    L1_SUBSCRIPTION_ATTEMPTS.with_label_values(&["failure"]).inc();
                    error!("Error subscribing to sequence batch events, retrying: {err}");
                }
            }

            tokio::select! {
                _ = stop.cancelled() => return None,
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    /// Wait for the next event, a subscription failure, the subscription
    /// timeout or a stop request, whichever comes first.
    pub async fn next(&self, subscription: &mut Subscription, stop: &CancellationToken) -> WatchOutcome {
        tokio::select! {
            biased;

            _ = stop.cancelled() => WatchOutcome::Stopped,
            event = subscription.events.next() => match event {
                Some(Ok(event)) => WatchOutcome::Event(event),
                Some(Err(err)) => WatchOutcome::SubscriptionError(err),
                None => WatchOutcome::SubscriptionError(Error::Subscription(
                    "event stream ended".into(),
                )),
            },
            _ = tokio::time::sleep(self.subscription_timeout) => {
                L1_SUBSCRIPTION_TIMEOUTS.inc();
                WatchOutcome::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{raw_event, MockL1Client};

    fn watcher(client: Arc<MockL1Client>) -> EventWatcher<MockL1Client> {
        EventWatcher::new(client, Duration::from_millis(10), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_subscribe_retries_until_established() {
        let client = Arc::new(MockL1Client::new(vec![]));
        client.fail_next_subscriptions(3);
        let stop = CancellationToken::new();

        let subscription = watcher(client.clone()).subscribe(42, &stop).await.unwrap();

        assert_eq!(subscription.start_block(), 42);
        assert_eq!(client.subscription_starts(), vec![42, 42, 42, 42]);
    }

    #[tokio::test]
    async fn test_subscribe_gives_up_when_stopped() {
        let client = Arc::new(MockL1Client::new(vec![]));
        client.fail_next_subscriptions(usize::MAX);
        let stop = CancellationToken::new();
        stop.cancel();

        assert!(watcher(client).subscribe(0, &stop).await.is_none());
    }

    #[tokio::test]
    async fn test_stop_interrupts_pending_subscribe() {
        let client = Arc::new(MockL1Client::new(vec![]));
        client.hang_subscriptions(true);
        let stop = CancellationToken::new();
        let watcher = EventWatcher::new(
            client.clone(),
            Duration::from_millis(10),
            Duration::from_secs(30),
        );

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stop.cancel();
        };
        let (subscription, ()) = tokio::time::timeout(Duration::from_secs(1), async {
            tokio::join!(watcher.subscribe(3, &stop), cancel)
        })
        .await
        .expect("subscribe returns once stopped");

        assert!(subscription.is_none());
        assert_eq!(client.subscription_starts(), vec![3]);
    }

    #[tokio::test]
    async fn test_next_yields_events_then_errors() {
        let client = Arc::new(MockL1Client::new(vec![]));
        let stop = CancellationToken::new();
        let watcher = watcher(client.clone());
        let mut subscription = watcher.subscribe(0, &stop).await.unwrap();

        client.emit(Ok(raw_event(7, &[])));
        client.emit(Err(Error::Subscription("connection reset".into())));

        assert!(matches!(
            watcher.next(&mut subscription, &stop).await,
            WatchOutcome::Event(event) if event.block_number == 7
        ));
        assert!(matches!(
            watcher.next(&mut subscription, &stop).await,
            WatchOutcome::SubscriptionError(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_times_out_when_idle() {
        let client = Arc::new(MockL1Client::new(vec![]));
        let stop = CancellationToken::new();
        let watcher = watcher(client);
        let mut subscription = watcher.subscribe(0, &stop).await.unwrap();

        assert!(matches!(
            watcher.next(&mut subscription, &stop).await,
            WatchOutcome::TimedOut
        ));
    }

    #[tokio::test]
    async fn test_stop_wins_over_pending_events() {
        let client = Arc::new(MockL1Client::new(vec![]));
        let stop = CancellationToken::new();
        let watcher = watcher(client.clone());
        let mut subscription = watcher.subscribe(0, &stop).await.unwrap();

        client.emit(Ok(raw_event(7, &[])));
        stop.cancel();

        assert!(matches!(
            watcher.next(&mut subscription, &stop).await,
            WatchOutcome::Stopped
        ));
    }
}
