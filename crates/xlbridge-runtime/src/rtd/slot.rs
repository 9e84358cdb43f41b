use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::metrics::BridgeMetrics;
use crate::rtd::publisher::{PublisherState, RtdPublisher};
use crate::scheduler::SchedulerHandle;
use crate::task::{TaskHandle, TaskOutcome};

/// Builds the producer future. Runs at most once per slot.
pub type Producer = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

struct SlotState {
    state: PublisherState,
    producer: Option<Producer>,
    task: Option<TaskHandle>,
}

/// The publisher lifecycle shared by every concrete publisher: a producer
/// that is spawned on the first subscriber and cancelled on the last.
pub struct ProducerSlot {
    topic: String,
    scheduler: SchedulerHandle,
    inner: Arc<Mutex<SlotState>>,
    metrics: Option<Arc<BridgeMetrics>>,
}

fn lock(inner: &Mutex<SlotState>) -> MutexGuard<'_, SlotState> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProducerSlot {
    pub fn new(topic: impl Into<String>, scheduler: SchedulerHandle, producer: Producer) -> Self {
        Self {
            topic: topic.into(),
            scheduler,
            inner: Arc::new(Mutex::new(SlotState {
                state: PublisherState::Created,
                producer: Some(producer),
                task: None,
            })),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<BridgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn start(&self, slot: &mut SlotState) {
        let Some(producer) = slot.producer.take() else {
            return;
        };
        let inner = self.inner.clone();
        let topic = self.topic.clone();
        let metrics = self.metrics.clone();
        let task = self.scheduler.spawn(move |token| async move {
            let cancelled = token.clone();
            producer(token).await;
            // Ending without being cancelled still moves the slot to Stopped
            let mut slot = lock(&inner);
            if slot.state != PublisherState::Stopped {
                slot.state = PublisherState::Stopped;
                if let Some(m) = &metrics {
                    m.record_publisher_stopped();
                }
                tracing::info!(topic = %topic, "Publisher finished");
            }
            if cancelled.is_cancelled() {
                TaskOutcome::Cancelled
            } else {
                TaskOutcome::Completed
            }
        });
        slot.task = Some(task);
        slot.state = PublisherState::Running;
        if let Some(m) = &self.metrics {
            m.record_publisher_started();
        }
        tracing::info!(topic = %self.topic, "Publisher started");
    }
}

impl RtdPublisher for ProducerSlot {
    fn connect(&self, num_subscribers: usize) {
        let mut slot = lock(&self.inner);
        if slot.state == PublisherState::Created && num_subscribers > 0 {
            self.start(&mut slot);
        }
    }

    fn disconnect(&self, num_subscribers: usize) -> bool {
        if num_subscribers == 0 {
            self.stop();
            return true;
        }
        false
    }

    fn stop(&self) {
        let mut slot = lock(&self.inner);
        slot.producer = None;
        if let Some(task) = &slot.task {
            task.cancel();
        }
        if slot.state != PublisherState::Stopped {
            let was_running = slot.state == PublisherState::Running;
            slot.state = PublisherState::Stopped;
            if was_running && let Some(m) = &self.metrics {
                m.record_publisher_stopped();
            }
            tracing::info!(topic = %self.topic, "Publisher stopped");
        }
    }

    fn done(&self) -> bool {
        lock(&self.inner).task.as_ref().is_none_or(TaskHandle::is_finished)
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    fn state(&self) -> PublisherState {
        lock(&self.inner).state
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;
    use crate::scheduler::Scheduler;

    fn counting_slot(handle: SchedulerHandle, starts: Arc<AtomicUsize>) -> ProducerSlot {
        ProducerSlot::new(
            "topic",
            handle,
            Box::new(move |token| {
                async move {
                    starts.fetch_add(1, Ordering::SeqCst);
                    token.cancelled().await;
                }
                .boxed()
            }),
        )
    }

    async fn wait_until(mut f: impl FnMut() -> bool) {
        for _ in 0..200 {
            if f() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn created_disconnect_zero_stops() {
        let scheduler = Scheduler::default();
        let starts = Arc::new(AtomicUsize::new(0));
        let slot = counting_slot(scheduler.handle().unwrap(), starts.clone());
        assert_eq!(slot.state(), PublisherState::Created);
        assert!(slot.done());
        assert!(slot.disconnect(0));
        assert_eq!(slot.state(), PublisherState::Stopped);

        slot.connect(1);
        assert_eq!(slot.state(), PublisherState::Stopped);
        assert_eq!(starts.load(Ordering::SeqCst), 0);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn connect_zero_does_not_start() {
        let scheduler = Scheduler::default();
        let starts = Arc::new(AtomicUsize::new(0));
        let slot = counting_slot(scheduler.handle().unwrap(), starts.clone());
        slot.connect(0);
        assert_eq!(slot.state(), PublisherState::Created);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn producer_ending_moves_to_stopped() {
        let scheduler = Scheduler::default();
        let metrics = Arc::new(BridgeMetrics::new());
        let slot = ProducerSlot::new("t", scheduler.handle().unwrap(), Box::new(|_| async {}.boxed()))
            .with_metrics(metrics.clone());
        slot.connect(1);
        wait_until(|| slot.state() == PublisherState::Stopped).await;
        wait_until(|| slot.done()).await;
        let snap = metrics.snapshot();
        assert_eq!(snap.publishers_started, 1);
        assert_eq!(snap.publishers_stopped, 1);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn stop_cancels_running_producer() {
        let scheduler = Scheduler::default();
        let starts = Arc::new(AtomicUsize::new(0));
        let slot = counting_slot(scheduler.handle().unwrap(), starts.clone());
        slot.connect(2);
        wait_until(|| starts.load(Ordering::SeqCst) == 1).await;
        assert!(!slot.done());
        slot.stop();
        slot.stop();
        assert_eq!(slot.state(), PublisherState::Stopped);
        wait_until(|| slot.done()).await;
        scheduler.shutdown();
    }
}
