use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use xlbridge_core::Value;

use crate::task::TaskHandle;

/// Address of the worksheet cell that made a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Caller {
    pub workbook: Option<String>,
    pub sheet: Option<String>,
    pub address: String,
}

impl Caller {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            workbook: None,
            sheet: None,
            address: address.into(),
        }
    }

    pub fn on_sheet(mut self, workbook: impl Into<String>, sheet: impl Into<String>) -> Self {
        self.workbook = Some(workbook.into());
        self.sheet = Some(sheet.into());
        self
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(wb) = &self.workbook {
            write!(f, "[{wb}]")?;
        }
        if let Some(sheet) = &self.sheet {
            write!(f, "{sheet}!")?;
        }
        write!(f, "{}", self.address)
    }
}

tokio::task_local! {
    static CALLER: Option<Caller>;
}

/// The caller of the async function currently running on this task, if any.
pub fn current_caller() -> Option<Caller> {
    CALLER.try_with(Clone::clone).ok().flatten()
}

pub(crate) fn with_caller<F: Future>(caller: Option<Caller>, fut: F) -> impl Future<Output = F::Output> {
    CALLER.scope(caller, fut)
}

/// Per-invocation callback handle through which an async call reports back
/// to the host.
///
/// Zero or more `set_result` calls are followed by exactly one `set_done`.
pub trait ThreadContext: Send + Sync {
    fn set_result(&self, value: Value);
    fn set_done(&self);
    /// Receives the handle of the task driving this invocation.
    fn set_task(&self, task: TaskHandle);
    fn caller(&self) -> Option<Caller> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
    Result(Value),
    Done,
}

/// A [`ThreadContext`] that forwards every callback into a channel.
pub struct ChannelContext {
    caller: Option<Caller>,
    events: mpsc::UnboundedSender<ContextEvent>,
    task: Mutex<Option<TaskHandle>>,
}

impl ChannelContext {
    pub fn new(caller: Option<Caller>) -> (Arc<Self>, ContextEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(Self {
            caller,
            events: tx,
            task: Mutex::new(None),
        });
        (ctx, ContextEvents { rx })
    }

    fn task(&self) -> MutexGuard<'_, Option<TaskHandle>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel the task handed over through `set_task`. Returns false when
    /// no task has been set yet.
    pub fn cancel(&self) -> bool {
        match &*self.task() {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    pub fn take_task(&self) -> Option<TaskHandle> {
        self.task().take()
    }
}

impl ThreadContext for ChannelContext {
    fn set_result(&self, value: Value) {
        let _ = self.events.send(ContextEvent::Result(value));
    }

    fn set_done(&self) {
        let _ = self.events.send(ContextEvent::Done);
    }

    fn set_task(&self, task: TaskHandle) {
        *self.task() = Some(task);
    }

    fn caller(&self) -> Option<Caller> {
        self.caller.clone()
    }
}

/// Receiving end of a [`ChannelContext`].
pub struct ContextEvents {
    rx: mpsc::UnboundedReceiver<ContextEvent>,
}

impl ContextEvents {
    pub async fn next(&mut self) -> Option<ContextEvent> {
        self.rx.recv().await
    }

    /// Collect events up to and including `Done`, or until `timeout`
    /// passes without one.
    pub async fn until_done(&mut self, timeout: Duration) -> Vec<ContextEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(timeout, self.rx.recv()).await {
            let done = event == ContextEvent::Done;
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    /// Events already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<ContextEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
