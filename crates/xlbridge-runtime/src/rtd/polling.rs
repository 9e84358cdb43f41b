use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use xlbridge_core::Value;

use crate::config::RtdConfig;
use crate::error::RtdError;
use crate::metrics::BridgeMetrics;
use crate::rtd::manager::RtdManager;
use crate::rtd::publisher::{PublisherState, RtdPublisher};
use crate::rtd::slot::{Producer, ProducerSlot};
use crate::scheduler::SchedulerHandle;

/// Publishes the result of a unit of work under its topic, repeating after
/// a fixed interval while it has subscribers.
///
/// A failed unit of work publishes the error text and ends the producer.
pub struct PollingPublisher {
    slot: ProducerSlot,
}

impl PollingPublisher {
    pub fn new<F, Fut>(
        topic: impl Into<String>,
        manager: &Arc<RtdManager>,
        scheduler: SchedulerHandle,
        interval: Duration,
        work: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let topic = topic.into();
        let producer = poll_loop(topic.clone(), Arc::downgrade(manager), interval, work);
        Self {
            slot: ProducerSlot::new(topic, scheduler, producer),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<BridgeMetrics>) -> Self {
        self.slot = self.slot.with_metrics(metrics);
        self
    }
}

fn poll_loop<F, Fut>(topic: String, manager: Weak<RtdManager>, interval: Duration, work: F) -> Producer
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Box::new(move |token| {
        async move {
            loop {
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    r = work() => r,
                };
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                match result {
                    Ok(value) => {
                        manager.publish(&topic, value);
                    }
                    Err(e) => {
                        tracing::warn!(topic = %topic, error = %e, "Polling publisher failed");
                        manager.publish(&topic, Value::Str(format!("{e:#}")));
                        return;
                    }
                }
                drop(manager);
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }
        .boxed()
    })
}

impl RtdPublisher for PollingPublisher {
    fn connect(&self, num_subscribers: usize) {
        self.slot.connect(num_subscribers);
    }

    fn disconnect(&self, num_subscribers: usize) -> bool {
        self.slot.disconnect(num_subscribers)
    }

    fn stop(&self) {
        self.slot.stop();
    }

    fn done(&self) -> bool {
        self.slot.done()
    }

    fn topic(&self) -> &str {
        self.slot.topic()
    }

    fn state(&self) -> PublisherState {
        self.slot.state()
    }
}

/// Polls a URL and publishes the response body under the URL as topic.
pub struct UrlPublisher {
    inner: PollingPublisher,
}

impl UrlPublisher {
    pub fn new(
        url: impl Into<String>,
        manager: &Arc<RtdManager>,
        scheduler: SchedulerHandle,
        config: &RtdConfig,
    ) -> Result<Self, RtdError> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let target = url.clone();
        let inner = PollingPublisher::new(url, manager, scheduler, config.poll_interval(), move || {
            let client = client.clone();
            let target = target.clone();
            async move {
                let body = client
                    .get(&target)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;
                Ok::<_, anyhow::Error>(Value::Str(body))
            }
        });
        Ok(Self { inner })
    }

    pub fn with_metrics(mut self, metrics: Arc<BridgeMetrics>) -> Self {
        self.inner = self.inner.with_metrics(metrics);
        self
    }
}

impl RtdPublisher for UrlPublisher {
    fn connect(&self, num_subscribers: usize) {
        self.inner.connect(num_subscribers);
    }

    fn disconnect(&self, num_subscribers: usize) -> bool {
        self.inner.disconnect(num_subscribers)
    }

    fn stop(&self) {
        self.inner.stop();
    }

    fn done(&self) -> bool {
        self.inner.done()
    }

    fn topic(&self) -> &str {
        self.inner.topic()
    }

    fn state(&self) -> PublisherState {
        self.inner.state()
    }
}
