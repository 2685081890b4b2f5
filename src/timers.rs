//! Repeating timers started by the `interval` builtin.
//!
//! Every interval is a task on the current [`tokio::task::LocalSet`] that
//! calls back into the interpreter against the environment the callback
//! closed over. Callbacks and the main program interleave only at await
//! points, but they share bindings with no further coordination.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::evaluator::Interpreter;
use crate::object::Object;

pub type TimerId = i64;

pub struct Timers {
    next_id: Cell<TimerId>,
    active: RefCell<HashMap<TimerId, AbortHandle>>,
    idle: Notify,
}

impl Default for Timers {
    fn default() -> Self {
        Timers {
            next_id: Cell::new(1),
            active: RefCell::new(HashMap::new()),
            idle: Notify::new(),
        }
    }
}

impl Timers {
    pub fn new() -> Self {
        Timers::default()
    }

    /// Calls `function` with `arguments` every `period`, the first call one
    /// period from now. Errors returned by the callback are printed to the
    /// interpreter's console; other results are dropped.
    ///
    /// # Panics
    ///
    /// Panics when called outside a [`tokio::task::LocalSet`].
    pub fn spawn_interval(
        &self,
        interpreter: &Interpreter,
        function: Object,
        period: Duration,
        arguments: Vec<Object>,
    ) -> TimerId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        // tokio rejects a zero period
        let period = period.max(Duration::from_millis(1));
        let task = tokio::task::spawn_local(run_interval(
            interpreter.clone(),
            id,
            function,
            period,
            arguments,
        ));

        debug!(id, ?period, "interval started");
        self.active.borrow_mut().insert(id, task.abort_handle());
        id
    }

    /// Cancels an interval. Returns false for ids that are not running.
    pub fn clear(&self, id: TimerId) -> bool {
        let removed = self.active.borrow_mut().remove(&id);
        let Some(handle) = removed else {
            return false;
        };
        handle.abort();
        debug!(id, "interval cleared");
        if self.is_empty() {
            self.idle.notify_waiters();
        }
        true
    }

    pub fn clear_all(&self) {
        let drained: Vec<(TimerId, AbortHandle)> = self.active.borrow_mut().drain().collect();
        for (id, handle) in drained {
            handle.abort();
            debug!(id, "interval cleared");
        }
        self.idle.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.active.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.borrow().is_empty()
    }

    /// Resolves once no interval is running.
    pub async fn wait_idle(&self) {
        loop {
            // Registered before the check so a clear in between is not missed
            let notified = self.idle.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

async fn run_interval(
    interpreter: Interpreter,
    id: TimerId,
    function: Object,
    period: Duration,
    arguments: Vec<Object>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let result = interpreter
            .apply_function(function.clone(), arguments.clone())
            .await;
        if result.is_error() {
            interpreter.console().print_line(&result.inspect());
        } else {
            trace!(id, %result, "interval callback finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::Builtin;
    use crate::console::{Console, LineReader};
    use tokio::task::LocalSet;

    fn run_local<F: std::future::Future>(future: F) -> F::Output {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build runtime");
        LocalSet::new().block_on(&runtime, future)
    }

    #[test]
    fn test_ids_are_sequential_and_clearable() {
        let (console, _output) = Console::captured(LineReader::scripted(Vec::<String>::new()));
        let interpreter = Interpreter::new(console);
        run_local(async {
            let timers = interpreter.timers();
            let noop = Object::Builtin(Builtin::Print);
            let first = timers.spawn_interval(&interpreter, noop.clone(), Duration::ZERO, vec![]);
            let second = timers.spawn_interval(&interpreter, noop, Duration::from_secs(60), vec![]);
            assert_eq!((first, second), (1, 2));
            assert_eq!(timers.len(), 2);

            assert!(timers.clear(first));
            assert!(!timers.clear(first));
            assert_eq!(timers.len(), 1);

            timers.clear_all();
            assert!(timers.is_empty());
            timers.wait_idle().await;
        });
    }

    #[test]
    fn test_callback_errors_are_printed() {
        let (console, output) = Console::captured(LineReader::scripted(Vec::<String>::new()));
        let interpreter = Interpreter::new(console);
        run_local(async {
            // `len` with no arguments always fails
            let id = interpreter.timers().spawn_interval(
                &interpreter,
                Object::Builtin(Builtin::Len),
                Duration::from_millis(1),
                vec![],
            );
            while output.contents().is_empty() {
                tokio::task::yield_now().await;
            }
            interpreter.timers().clear(id);
            interpreter.timers().wait_idle().await;
        });
        assert!(
            output
                .contents()
                .starts_with("ERROR: wrong number of arguments. got=0, want=1 || 2")
        );
    }
}
