//! Async execution for worksheet functions.
//!
//! Async functions run on a [`Scheduler`], a dedicated thread with its own
//! tokio runtime. [`AsyncBridge`] reports results through a
//! [`ThreadContext`]; [`rtd::RtdFunction`] publishes them as real-time data
//! topics managed by [`rtd::RtdManager`].
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xlbridge_core::{CallArgs, UserFunction, Value};
//! use xlbridge_runtime::{AsyncBridge, ChannelContext, Scheduler};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let scheduler = Scheduler::default();
//! let double = UserFunction::coroutine(|args: CallArgs| async move {
//!     let x = args.number(0).ok_or_else(|| anyhow::anyhow!("expected a number"))?;
//!     Ok(Value::Number(x * 2.0))
//! });
//! let bridge = AsyncBridge::new(scheduler.handle()?, "DOUBLE", double)?;
//!
//! let (ctx, mut events) = ChannelContext::new(None);
//! bridge.invoke(ctx, CallArgs::new(vec![Value::Number(21.0)]));
//! let results = events.until_done(std::time::Duration::from_secs(1)).await;
//! # let _ = results;
//! scheduler.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod rtd;
pub mod scheduler;
pub mod task;

pub use bridge::AsyncBridge;
pub use config::{BridgeConfig, CONFIG_ENV, RtdConfig, SchedulerConfig};
pub use context::{Caller, ChannelContext, ContextEvent, ContextEvents, ThreadContext, current_caller};
pub use error::{ConfigError, RtdError, SchedulerError};
pub use metrics::{BridgeMetrics, MetricsBackend, MetricsSnapshot, TracingMetricsBackend};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use task::{TaskHandle, TaskOutcome};
