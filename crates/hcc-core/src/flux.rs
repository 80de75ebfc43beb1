//! Stream plumbing.
//!
//! Every `compute` stage in the system is a [`Pipeline`]: a task reading an
//! input stream and writing into a bounded channel, owned together with the
//! [`Subscription`] that cancels it. Order within one pipeline is preserved;
//! nothing is promised across independently sourced pipelines.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::future::ready;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::signal::Signal;

/// A push stream of signals.
pub type Flux<T, P = ()> = BoxStream<'static, Signal<T, P>>;

/// Channel depth between pipeline stages.
pub const PIPELINE_CAPACITY: usize = 64;

/// Broadcast depth for status multicasts.
pub const MULTICAST_CAPACITY: usize = 256;

/// Cancellation handle for a running stage. Disposal is idempotent.
#[derive(Debug, Clone)]
pub struct Subscription {
    name: Arc<str>,
    token: CancellationToken,
}

impl Subscription {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            token: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn dispose(&self) {
        if !self.token.is_cancelled() {
            debug!(subscription = %self.name, "disposed");
            self.token.cancel();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Output side of a running stage.
///
/// Dropping the pipeline disposes its subscription, which stops the stage.
pub struct Pipeline<T> {
    rx: mpsc::Receiver<T>,
    subscription: Subscription,
}

impl<T> Unpin for Pipeline<T> {}

impl<T: Send + 'static> Pipeline<T> {
    /// Run `body` on its own task, feeding the returned pipeline.
    pub fn spawn<F, Fut>(name: &str, body: F) -> Self
    where
        F: FnOnce(mpsc::Sender<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(PIPELINE_CAPACITY);
        let subscription = Subscription::new(name);
        let token = subscription.token();
        let stage = subscription.name.clone();
        let work = body(tx);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => trace!(stage = %stage, "cancelled"),
                _ = work => trace!(stage = %stage, "input complete"),
            }
        });
        Self { rx, subscription }
    }

    /// One output (or none) per input element, in order.
    pub fn map<I, F>(name: &str, mut input: BoxStream<'static, I>, mut f: F) -> Self
    where
        I: Send + 'static,
        F: FnMut(I) -> Option<T> + Send + 'static,
    {
        Self::spawn(name, move |tx| async move {
            while let Some(item) = input.next().await {
                if let Some(out) = f(item) {
                    if tx.send(out).await.is_err() {
                        break;
                    }
                }
            }
        })
    }
}

impl<T> Pipeline<T> {
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn dispose(&self) {
        self.subscription.dispose();
    }
}

impl<T> Stream for Pipeline<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> Drop for Pipeline<T> {
    fn drop(&mut self) {
        self.subscription.dispose();
    }
}

#[derive(Clone)]
enum Event<T> {
    Item(T),
    Closed,
}

/// Replay-less fan-out of a status stream to any number of late subscribers.
///
/// Slow subscribers skip what they missed instead of failing.
pub struct Multicast<T> {
    tx: broadcast::Sender<Event<T>>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for Multicast<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Multicast<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the number of subscribers reached.
    pub fn publish(&self, item: T) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.tx.send(Event::Item(item)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> BoxStream<'static, T> {
        let rx = self.tx.subscribe();
        if self.is_closed() {
            return stream::empty().boxed();
        }
        BroadcastStream::new(rx)
            .filter_map(|event| {
                ready(match event {
                    Ok(event) => Some(event),
                    Err(lagged) => {
                        trace!(%lagged, "multicast subscriber lagging");
                        None
                    }
                })
            })
            .take_while(|event| ready(matches!(event, Event::Item(_))))
            .filter_map(|event| {
                ready(match event {
                    Event::Item(item) => Some(item),
                    Event::Closed => None,
                })
            })
            .boxed()
    }

    /// Complete every current subscription; later subscriptions are empty.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(Event::Closed);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Where sensor and switch signals come from: one stream per device address.
pub trait SignalSource<T, P = ()>: Send + Sync {
    fn flux(&self, address: &str) -> Flux<T, P>;
}

/// In-process [`SignalSource`] that drivers (or tests) publish into by address.
pub struct SignalHub<T, P = ()> {
    channels: Mutex<HashMap<String, Multicast<Signal<T, P>>>>,
}

impl<T, P> Default for SignalHub<T, P> {
    fn default() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }
}

impl<T, P> SignalHub<T, P>
where
    T: Clone + Send + 'static,
    P: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, address: &str) -> Multicast<Signal<T, P>> {
        self.channels
            .lock()
            .entry(address.to_string())
            .or_insert_with(|| Multicast::new(MULTICAST_CAPACITY))
            .clone()
    }

    pub fn publish(&self, address: &str, signal: Signal<T, P>) -> usize {
        self.channel(address).publish(signal)
    }

    pub fn addresses(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.channels.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Complete every stream handed out so far.
    pub fn close(&self) {
        for channel in self.channels.lock().values() {
            channel.close();
        }
    }
}

impl<T, P> SignalSource<T, P> for SignalHub<T, P>
where
    T: Clone + Send + 'static,
    P: Clone + Send + 'static,
{
    fn flux(&self, address: &str) -> Flux<T, P> {
        self.channel(address).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test]
    async fn map_preserves_order() {
        let input = stream::iter(1..=5).boxed();
        let out: Vec<i32> = Pipeline::map("double", input, |x| Some(x * 2))
            .collect()
            .await;
        assert_eq!(out, vec![2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn map_may_skip_elements() {
        let input = stream::iter(1..=6).boxed();
        let out: Vec<i32> = Pipeline::map("odd", input, |x| (x % 2 == 1).then_some(x))
            .collect()
            .await;
        assert_eq!(out, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_ends_stream() {
        let (tx, rx) = mpsc::channel::<i32>(4);
        let input = tokio_stream::wrappers::ReceiverStream::new(rx).boxed();
        let mut pipeline = Pipeline::map("identity", input, Some);

        tx.send(1).await.unwrap();
        assert_eq!(pipeline.next().await, Some(1));

        pipeline.dispose();
        pipeline.dispose();
        assert!(pipeline.subscription().is_disposed());

        let next = tokio::time::timeout(Duration::from_secs(1), pipeline.next()).await;
        assert_eq!(next.unwrap(), None);
    }

    #[tokio::test]
    async fn multicast_close_completes_subscribers() {
        let mc = Multicast::new(8);
        let mut a = mc.subscribe();
        mc.publish(1);
        mc.publish(2);
        mc.close();
        assert_eq!(a.next().await, Some(1));
        assert_eq!(a.next().await, Some(2));
        assert_eq!(a.next().await, None);

        let mut late = mc.subscribe();
        assert_eq!(late.next().await, None);
        assert_eq!(mc.publish(3), 0);
    }

    #[tokio::test]
    async fn hub_routes_by_address() {
        let hub: SignalHub<f64> = SignalHub::new();
        let mut kitchen = hub.flux("kitchen");
        let mut bedroom = hub.flux("bedroom");

        hub.publish("kitchen", Signal::new(Utc::now(), 21.0));
        hub.publish("bedroom", Signal::new(Utc::now(), 18.0));
        hub.close();

        assert_eq!(kitchen.next().await.unwrap().value(), Some(&21.0));
        assert!(kitchen.next().await.is_none());
        assert_eq!(bedroom.next().await.unwrap().value(), Some(&18.0));
        assert_eq!(hub.addresses(), vec!["bedroom", "kitchen"]);
    }
}
