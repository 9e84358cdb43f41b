use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt::{self, Write};
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream};
use futures::{FutureExt, StreamExt};

use crate::value::{CallArgs, Value};

/// Error raised by user code. Rendered with its full chain when it has to
/// cross the host boundary.
pub type UserError = anyhow::Error;
pub type UserResult = Result<Value, UserError>;

pub type PlainFn = Arc<dyn Fn(CallArgs) -> UserResult + Send + Sync>;
pub type CoroutineFn = Arc<dyn Fn(CallArgs) -> BoxFuture<'static, UserResult> + Send + Sync>;
pub type GeneratorFn = Arc<dyn Fn(CallArgs) -> BoxStream<'static, UserResult> + Send + Sync>;

/// A user callable, tagged by how it produces its values.
#[derive(Clone)]
pub enum UserFunction {
    Plain(PlainFn),
    Coroutine(CoroutineFn),
    AsyncGenerator(GeneratorFn),
}

impl UserFunction {
    pub fn plain<F>(f: F) -> Self
    where
        F: Fn(CallArgs) -> UserResult + Send + Sync + 'static,
    {
        UserFunction::Plain(Arc::new(f))
    }

    pub fn coroutine<F, Fut>(f: F) -> Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = UserResult> + Send + 'static,
    {
        UserFunction::Coroutine(Arc::new(move |args| f(args).boxed()))
    }

    pub fn generator<F, S>(f: F) -> Self
    where
        F: Fn(CallArgs) -> S + Send + Sync + 'static,
        S: Stream<Item = UserResult> + Send + 'static,
    {
        UserFunction::AsyncGenerator(Arc::new(move |args| f(args).boxed()))
    }

    pub fn is_async(&self) -> bool {
        !matches!(self, UserFunction::Plain(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UserFunction::Plain(_) => "plain",
            UserFunction::Coroutine(_) => "coroutine",
            UserFunction::AsyncGenerator(_) => "async_generator",
        }
    }

    /// True when both values wrap the same callable.
    pub fn same_callable(&self, other: &UserFunction) -> bool {
        match (self, other) {
            (UserFunction::Plain(a), UserFunction::Plain(b)) => Arc::ptr_eq(a, b),
            (UserFunction::Coroutine(a), UserFunction::Coroutine(b)) => Arc::ptr_eq(a, b),
            (UserFunction::AsyncGenerator(a), UserFunction::AsyncGenerator(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for UserFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UserFunction").field(&self.kind()).finish()
    }
}

/// Render a user error as the text written back to the cell: the message,
/// one `Caused by:` line per source, then a stack trace. The error's own
/// backtrace is used when one was captured, otherwise the current stack.
pub fn render_error(err: &UserError) -> String {
    let mut text = err.to_string();
    for cause in err.chain().skip(1) {
        let _ = write!(text, "\nCaused by: {cause}");
    }
    let backtrace = err.backtrace();
    if backtrace.status() == BacktraceStatus::Captured {
        let _ = write!(text, "\nStack trace:\n{backtrace}");
    } else {
        let _ = write!(text, "\nStack trace:\n{}", Backtrace::force_capture());
    }
    text
}
