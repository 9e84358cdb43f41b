use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use xlbridge_core::function::render_error;
use xlbridge_core::{CallArgs, DeclarationError, UserError, UserFunction, Value};

use crate::context::{ThreadContext, with_caller};
use crate::metrics::BridgeMetrics;
use crate::scheduler::SchedulerHandle;
use crate::task::TaskOutcome;

/// Runs an async user function on the scheduler on behalf of a synchronous
/// host call.
#[derive(Clone)]
pub struct AsyncBridge {
    name: String,
    func: UserFunction,
    scheduler: SchedulerHandle,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl std::fmt::Debug for AsyncBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncBridge")
            .field("name", &self.name)
            .field("func", &self.func)
            .finish()
    }
}

impl AsyncBridge {
    pub fn new(
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
            scheduler,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<BridgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schedule the function and return immediately. The task handle is
    /// passed to `ctx.set_task` before the function starts running.
    pub fn invoke(&self, ctx: Arc<dyn ThreadContext>, args: CallArgs) {
        if let Some(m) = &self.metrics {
            m.record_invocation();
        }
        if self.scheduler.is_shut_down() {
            tracing::warn!(function = %self.name, "Scheduler is shut down, completing call without running it");
            if let Some(m) = &self.metrics {
                m.record_cancellation();
            }
            ctx.set_done();
            return;
        }
        tracing::debug!(function = %self.name, "Scheduling async call");

        let (start_tx, start_rx) = oneshot::channel::<()>();
        let func = self.func.clone();
        let metrics = self.metrics.clone();
        let task_ctx = ctx.clone();
        let guard = DoneGuard(Some(ctx.clone()));
        let task = self.scheduler.spawn(move |token| async move {
            // The sender is dropped right after set_task either way
            let _ = start_rx.await;
            let outcome = drive(func, args, task_ctx, token, metrics).await;
            guard.disarm();
            outcome
        });
        ctx.set_task(task);
        let _ = start_tx.send(());
        if let Some(m) = &self.metrics {
            m.record_active_tasks(self.scheduler.active_tasks());
        }
    }
}

/// Calls `set_done` if the task is dropped before `drive` finished, which
/// happens when the loop stops underneath it.
struct DoneGuard(Option<Arc<dyn ThreadContext>>);

impl DoneGuard {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        if let Some(ctx) = self.0.take() {
            tracing::debug!("Async call dropped by the scheduler");
            ctx.set_done();
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

async fn run_user(func: UserFunction, args: CallArgs, ctx: &dyn ThreadContext, metrics: Option<&BridgeMetrics>) -> Result<(), UserError> {
    let deliver = |value: Value| {
        if let Some(m) = metrics {
            m.record_result();
        }
        ctx.set_result(value);
    };
    match func {
        UserFunction::Coroutine(f) => deliver(f(args).await?),
        UserFunction::AsyncGenerator(f) => {
            let mut stream = f(args);
            while let Some(item) = stream.next().await {
                deliver(item?);
            }
        }
        UserFunction::Plain(f) => deliver(f(args)?),
    }
    Ok(())
}

/// Drive one invocation to the end, reporting through `ctx`.
///
/// Results are delivered as produced; errors and panics are delivered as a
/// rendered string. `set_done` is called exactly once on every path,
/// including cancellation, where no further result is delivered.
pub(crate) async fn drive(
    func: UserFunction,
    args: CallArgs,
    ctx: Arc<dyn ThreadContext>,
    token: CancellationToken,
    metrics: Option<Arc<BridgeMetrics>>,
) -> TaskOutcome {
    let caller = ctx.caller();
    let body = with_caller(caller, run_user(func, args, ctx.as_ref(), metrics.as_deref()));

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        r = AssertUnwindSafe(body).catch_unwind() => Some(r),
    };

    let outcome = match result {
        None => {
            tracing::debug!("Async call cancelled");
            if let Some(m) = &metrics {
                m.record_cancellation();
            }
            TaskOutcome::Cancelled
        }
        Some(Ok(Ok(()))) => TaskOutcome::Completed,
        Some(Ok(Err(err))) => {
            let text = render_error(&err);
            tracing::warn!(error = %err, "Async user function failed");
            if let Some(m) = &metrics {
                m.record_user_error();
            }
            ctx.set_result(Value::Str(text.clone()));
            TaskOutcome::Failed(text)
        }
        Some(Err(payload)) => {
            let text = format!(
                "panic: {}\nStack trace:\n{}",
                panic_message(payload),
                Backtrace::force_capture()
            );
            tracing::warn!(error = %text, "Async user function panicked");
            if let Some(m) = &metrics {
                m.record_user_error();
            }
            ctx.set_result(Value::Str(text.clone()));
            TaskOutcome::Failed(text)
        }
    };

    ctx.set_done();
    if let Some(m) = &metrics {
        m.record_completion();
    }
    outcome
}
