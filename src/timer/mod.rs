//! One-shot timer abstraction for the initial-fetch timeout.
//!
//! The engine is single-threaded, so timer callbacks are plain non-Send
//! closures that re-enter the control thread. The production
//! implementation rides tokio's local task set; tests use the manual timer
//! from `test_utils`.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A scheduled one-shot timer. Dropping the handle cancels it.
pub trait ArmedTimer {
    fn cancel(&self);
}

pub trait TimerFactory {
    /// Schedules `on_fire` to run once after `after`, unless cancelled.
    fn arm(
        &self,
        after: Duration,
        on_fire: Box<dyn FnOnce()>,
    ) -> Box<dyn ArmedTimer>;
}

/// Tokio-backed timer for the control thread.
///
/// Must be used from within a `tokio::task::LocalSet` (the callback is not
/// `Send`); the embedding event loop is expected to run the control thread
/// inside one.
#[derive(Debug, Default)]
pub struct LocalTimerFactory;

impl TimerFactory for LocalTimerFactory {
    fn arm(
        &self,
        after: Duration,
        on_fire: Box<dyn FnOnce()>,
    ) -> Box<dyn ArmedTimer> {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::task::spawn_local(async move {
            tokio::select! {
                _ = child.cancelled() => {}
                _ = tokio::time::sleep(after) => on_fire(),
            }
        });
        Box::new(TokioArmedTimer { token })
    }
}

struct TokioArmedTimer {
    token: CancellationToken,
}

impl ArmedTimer for TokioArmedTimer {
    fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for TokioArmedTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod timer_test {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    use super::{LocalTimerFactory, TimerFactory};

    #[tokio::test(start_paused = true)]
    async fn test_local_timer_fires() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let fired = Rc::new(Cell::new(false));
                let flag = Rc::clone(&fired);
                let _timer = LocalTimerFactory.arm(
                    Duration::from_millis(50),
                    Box::new(move || flag.set(true)),
                );
                tokio::time::sleep(Duration::from_millis(60)).await;
                assert!(fired.get());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_timer_cancelled() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let fired = Rc::new(Cell::new(false));
                let flag = Rc::clone(&fired);
                let timer = LocalTimerFactory.arm(
                    Duration::from_millis(50),
                    Box::new(move || flag.set(true)),
                );
                timer.cancel();
                tokio::time::sleep(Duration::from_millis(60)).await;
                assert!(!fired.get());
            })
            .await;
    }
}
