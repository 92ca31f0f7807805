//! Background sampling threads.
//!
//! A `SamplingThread` runs one closure immediately and then once per
//! interval until it is cancelled. Cancellation goes through a
//! [`CancellationToken`] shared between the owner and the loop; the loop
//! sleeps on the token's condition variable so termination is observed
//! without waiting out the interval.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

use crate::error::{PalError, Result};

/// Shared cancel flag plus the condition variable sleepers wait on.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every sleeper.
    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        let mut cancelled = flag.lock().unwrap_or_else(|p| p.into_inner());
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Sleeps up to `timeout`. Returns `true` when cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = flag.lock().unwrap_or_else(|p| p.into_inner());
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = cvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(|p| p.into_inner());
            cancelled = guard;
        }
        *cancelled
    }
}

/// A named worker calling a sampling closure on a fixed period.
pub struct SamplingThread {
    name: String,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SamplingThread {
    /// Spawns the worker. `body` runs right away and then every `interval`.
    pub fn spawn<F>(name: &str, interval: Duration, mut body: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                debug!("Sampling thread '{}' started ({:?})", thread_name, interval);
                while !loop_token.is_cancelled() {
                    let start = Instant::now();
                    body();
                    trace!(
                        "Sampling thread '{}' pass took {:?}",
                        thread_name,
                        start.elapsed()
                    );
                    if loop_token.wait_timeout(interval) {
                        break;
                    }
                }
                debug!("Sampling thread '{}' exiting", thread_name);
            })
            .map_err(|e| PalError::io(format!("Failed to spawn sampling thread {}", name), e))?;

        info!("Started sampling thread '{}'", name);
        Ok(Self {
            name: name.to_string(),
            token,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Asks the loop to exit at its next wakeup.
    pub fn request_terminate(&self) {
        self.token.cancel();
    }

    /// Blocks until the worker has exited. Safe to call more than once.
    pub fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Sampling thread '{}' panicked", self.name);
            } else {
                debug!("Sampling thread '{}' joined", self.name);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for SamplingThread {
    fn drop(&mut self) {
        self.request_terminate();
        self.wait();
    }
}

/// Optional sampling thread owned by an enumeration.
///
/// Enumerations are shared behind `&self`, so the thread handle lives
/// behind its own small mutex. Dropping the slot terminates and joins.
#[derive(Default)]
pub struct SamplerSlot {
    thread: Mutex<Option<SamplingThread>>,
}

impl SamplerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `body` on a new thread unless one is already running.
    pub fn start<F>(&self, name: &str, interval: Duration, body: F) -> Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        let mut slot = self.thread.lock().unwrap_or_else(|p| p.into_inner());
        if slot.as_ref().is_some_and(|t| t.is_running()) {
            debug!("Sampling thread '{}' already running", name);
            return Ok(());
        }
        *slot = Some(SamplingThread::spawn(name, interval, body)?);
        Ok(())
    }

    /// Requests termination and waits for the thread to exit.
    pub fn stop(&self) {
        let taken = self
            .thread
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(mut thread) = taken {
            thread.request_terminate();
            thread.wait();
            info!("Stopped sampling thread '{}'", thread.name());
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|t| t.is_running())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_token_wait_returns_on_cancel() {
        let token = CancellationToken::new();
        let other = token.clone();
        let waiter = thread::spawn(move || other.wait_timeout(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_token_timeout_without_cancel() {
        let token = CancellationToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn test_thread_samples_immediately_and_stops() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let mut t = SamplingThread::spawn("test-sampler", Duration::from_secs(60), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let start = Instant::now();
        t.request_terminate();
        t.wait();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!t.is_running());
    }

    #[test]
    fn test_drop_joins_thread() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let t = SamplingThread::spawn("drop-sampler", Duration::from_millis(1), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        thread::sleep(Duration::from_millis(20));
        drop(t);
        let after = counter.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), after);
    }

    #[test]
    fn test_slot_start_is_idempotent() {
        let counter = Arc::new(AtomicU32::new(0));
        let slot = SamplerSlot::new();
        for _ in 0..2 {
            let c = counter.clone();
            slot.start("slot-sampler", Duration::from_secs(60), move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

            let deadline = Instant::now() + Duration::from_secs(5);
            while counter.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
        }
        assert!(slot.is_running());
        slot.stop();
        assert!(!slot.is_running());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
