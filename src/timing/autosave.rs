// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Re-armable single-shot deadline timer.
//!
//! One worker thread per timer waits for the pending deadline and runs the
//! callback once when it passes. The timer never re-arms itself: the callback
//! (or any other owner code) calls [`AutoSaveTimer::rearm`] when it wants
//! another deadline.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::error::TimerError;

/// Callback run when a deadline passes
pub type FireCallback = Arc<dyn Fn() + Send + Sync>;

/// Timer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// No deadline pending
    Idle,
    /// Deadline pending
    Armed,
    /// Callback is running
    Fired,
}

struct TimerInner {
    state: TimerState,
    timeout: Duration,
    deadline: Option<Instant>,
    callback: Option<FireCallback>,
    firing: bool,
    shutdown: bool,
    worker: Option<ThreadId>,
}

struct Shared {
    inner: Mutex<TimerInner>,
    signal: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TimerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Inactivity deadline scheduler
pub struct AutoSaveTimer {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AutoSaveTimer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(TimerInner {
                    state: TimerState::Idle,
                    timeout: Duration::ZERO,
                    deadline: None,
                    callback: None,
                    firing: false,
                    shutdown: false,
                    worker: None,
                }),
                signal: Condvar::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Start a deadline `timeout` from now that runs `on_fire` once
    pub fn arm<F>(&self, timeout: Duration, on_fire: F) -> Result<(), TimerError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        {
            let mut inner = self.shared.lock();
            if inner.state == TimerState::Armed {
                return Err(TimerError::AlreadyArmed);
            }
            inner.timeout = timeout;
            inner.callback = Some(Arc::new(on_fire));
            inner.deadline = Some(Instant::now() + timeout);
            inner.state = TimerState::Armed;
        }
        self.ensure_worker();
        self.shared.signal.notify_all();
        debug!(timeout_ms = timeout.as_millis() as u64, "Auto-save timer armed");
        Ok(())
    }

    /// Replace any pending deadline with a fresh one.
    ///
    /// No-op until [`arm`](Self::arm) has been called, and again after
    /// [`disarm`](Self::disarm).
    pub fn rearm(&self) {
        let mut inner = self.shared.lock();
        if inner.callback.is_none() {
            return;
        }
        inner.deadline = Some(Instant::now() + inner.timeout);
        inner.state = TimerState::Armed;
        drop(inner);
        self.shared.signal.notify_all();
    }

    /// Cancel the pending deadline and forget the callback.
    ///
    /// When a callback is running on the timer thread, this waits for it to
    /// return, so no fire is observed after `disarm` returns. Called from the
    /// callback itself it returns immediately.
    pub fn disarm(&self) {
        let mut inner = self.shared.lock();
        inner.state = TimerState::Idle;
        inner.deadline = None;
        inner.callback = None;
        self.shared.signal.notify_all();

        let on_worker = inner.worker == Some(thread::current().id());
        while inner.firing && !on_worker {
            inner = self
                .shared
                .signal
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        debug!("Auto-save timer disarmed");
    }

    pub fn is_armed(&self) -> bool {
        self.shared.lock().state == TimerState::Armed
    }

    pub fn state(&self) -> TimerState {
        self.shared.lock().state
    }

    /// Time left until the pending deadline
    pub fn remaining(&self) -> Option<Duration> {
        let inner = self.shared.lock();
        match (inner.state, inner.deadline) {
            (TimerState::Armed, Some(deadline)) => {
                Some(deadline.saturating_duration_since(Instant::now()))
            }
            _ => None,
        }
    }

    fn ensure_worker(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let worker = thread::spawn(move || run_worker(&shared));
        self.shared.lock().worker = Some(worker.thread().id());
        *handle = Some(worker);
    }
}

impl Default for AutoSaveTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AutoSaveTimer {
    fn drop(&mut self) {
        let worker = {
            let mut inner = self.shared.lock();
            inner.shutdown = true;
            inner.callback = None;
            inner.worker
        };
        self.shared.signal.notify_all();

        let handle = self
            .handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // Dropped from inside its own callback: the worker exits on its own
        if let Some(handle) = handle {
            if worker != Some(thread::current().id()) {
                let _ = handle.join();
            }
        }
    }
}

fn run_worker(shared: &Shared) {
    let mut inner = shared.lock();
    loop {
        if inner.shutdown {
            return;
        }

        let deadline = match (inner.state, inner.deadline) {
            (TimerState::Armed, Some(deadline)) => deadline,
            _ => {
                inner = shared
                    .signal
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            }
        };

        let now = Instant::now();
        if now < deadline {
            inner = shared
                .signal
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        }

        inner.state = TimerState::Fired;
        inner.deadline = None;
        let Some(callback) = inner.callback.clone() else {
            inner.state = TimerState::Idle;
            continue;
        };
        inner.firing = true;
        drop(inner);

        debug!("Auto-save timer fired");
        if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
            error!("Auto-save timer callback panicked");
        }

        inner = shared.lock();
        inner.firing = false;
        if inner.state == TimerState::Fired {
            inner.state = TimerState::Idle;
        }
        shared.signal.notify_all();
    }
}
