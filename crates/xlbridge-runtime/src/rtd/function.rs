use std::sync::{Arc, Weak};

use futures::FutureExt;
use sha2::{Digest, Sha256};
use xlbridge_core::{CallArgs, DeclarationError, UserFunction, Value};

use crate::bridge::drive;
use crate::context::{Caller, ThreadContext};
use crate::metrics::BridgeMetrics;
use crate::rtd::manager::RtdManager;
use crate::rtd::publisher::{PublisherState, RtdPublisher};
use crate::rtd::slot::ProducerSlot;
use crate::scheduler::SchedulerHandle;
use crate::task::TaskHandle;

/// Thread context for an RTD-async call: results are published under the
/// call's topic instead of being returned to a waiting cell.
pub struct RtdContext {
    topic: String,
    manager: Weak<RtdManager>,
    caller: Option<Caller>,
}

impl ThreadContext for RtdContext {
    fn set_result(&self, value: Value) {
        if let Some(manager) = self.manager.upgrade() {
            manager.publish(&self.topic, value);
        }
    }

    fn set_done(&self) {
        tracing::trace!(topic = %self.topic, "RTD call finished");
    }

    fn set_task(&self, _task: TaskHandle) {}

    fn caller(&self) -> Option<Caller> {
        self.caller.clone()
    }
}

/// Publisher whose producer runs one async function call.
pub struct FunctionPublisher {
    slot: ProducerSlot,
}

impl FunctionPublisher {
    pub fn new(
        topic: impl Into<String>,
        func: UserFunction,
        args: CallArgs,
        caller: Option<Caller>,
        manager: &Arc<RtdManager>,
        scheduler: SchedulerHandle,
        metrics: Option<Arc<BridgeMetrics>>,
    ) -> Self {
        let topic = topic.into();
        let ctx: Arc<dyn ThreadContext> = Arc::new(RtdContext {
            topic: topic.clone(),
            manager: Arc::downgrade(manager),
            caller,
        });
        let driver_metrics = metrics.clone();
        let mut slot = ProducerSlot::new(
            topic,
            scheduler,
            Box::new(move |token| {
                async move {
                    drive(func, args, ctx, token, driver_metrics).await;
                }
                .boxed()
            }),
        );
        if let Some(m) = metrics {
            slot = slot.with_metrics(m);
        }
        Self { slot }
    }
}

impl RtdPublisher for FunctionPublisher {
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

/// Runs an async function as an RTD subscription: each distinct
/// (function, caller, arguments) triple gets its own topic and publisher.
pub struct RtdFunction {
    name: String,
    func: UserFunction,
    manager: Arc<RtdManager>,
    scheduler: SchedulerHandle,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl RtdFunction {
    pub fn new(
        manager: Arc<RtdManager>,
        scheduler: SchedulerHandle,
        name: impl Into<String>,
        func: UserFunction,
    ) -> Result<Self, DeclarationError> {
        let name = name.into();
        if !func.is_async() {
            return Err(DeclarationError::NotAsync { function: name });
        }
        Ok(Self {
            name,
            func,
            manager,
            scheduler,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<BridgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn topic(&self, caller: Option<&Caller>, args: &CallArgs) -> String {
        let json = serde_json::to_string(args).unwrap_or_default();
        let digest = hex::encode(Sha256::digest(json.as_bytes()));
        let caller = caller.map(ToString::to_string).unwrap_or_default();
        format!("{}|{}|{}", self.name, caller, &digest[..16])
    }

    /// Return the topic's current value, starting a publisher when there is
    /// neither a live one nor a value left by a finished one. `None` means
    /// the value is pending; the host should subscribe to the topic.
    pub fn call(&self, caller: Option<Caller>, args: CallArgs) -> (String, Option<Value>) {
        let topic = self.topic(caller.as_ref(), &args);
        if self.manager.peek(&topic).is_none() && self.manager.value(&topic).is_none() {
            tracing::debug!(function = %self.name, topic = %topic, "Starting RTD call");
            if let Some(m) = &self.metrics {
                m.record_invocation();
            }
            let publisher = FunctionPublisher::new(
                topic.clone(),
                self.func.clone(),
                args,
                caller,
                &self.manager,
                self.scheduler.clone(),
                self.metrics.clone(),
            );
            self.manager.start(Arc::new(publisher));
        }
        let value = self.manager.subscribe(&topic);
        (topic, value)
    }
}
