//! Shutdown and reconfigure requests delivered to the receiver loop.
//!
//! Requests are flags plus a wakeup. Setting a flag never interrupts work in
//! progress; the loop polls the flags once per iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Default)]
struct Inner {
    shutdown: AtomicBool,
    reload: AtomicBool,
    wakeup: Notify,
}

/// Cloneable handle shared between the receiver and whoever signals it.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.wakeup.notify_one();
    }

    pub fn request_reload(&self) {
        self.inner.reload.store(true, Ordering::SeqCst);
        self.inner.wakeup.notify_one();
    }

    pub fn shutdown_requested(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Consume a pending reload request.
    pub fn take_reload(&self) -> bool {
        self.inner.reload.swap(false, Ordering::SeqCst)
    }

    /// Whether a shutdown or reload request is waiting to be handled.
    pub fn has_pending_request(&self) -> bool {
        self.shutdown_requested() || self.inner.reload.load(Ordering::SeqCst)
    }

    /// Wait for any request. A request made while nobody waits is remembered.
    pub async fn notified(&self) {
        if self.has_pending_request() {
            return;
        }
        self.inner.wakeup.notified().await;
    }

    /// Sleep for `timeout` or until a request arrives.
    pub async fn wait(&self, timeout: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {}
            _ = self.notified() => {}
        }
    }

    /// Sleep for `timeout` or until shutdown is requested.
    ///
    /// Reload requests arriving meanwhile are consumed and do not end the
    /// sleep; there is no running receiver to reconfigure.
    pub async fn wait_for_shutdown(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            if self.take_reload() {
                info!("Reload request received while no receiver is running");
            }
            if self.shutdown_requested() {
                return;
            }
            if tokio::time::timeout_at(deadline, self.notified()).await.is_err() {
                return;
            }
        }
    }

    /// Translate process signals into requests: SIGTERM and SIGINT ask for
    /// shutdown, SIGHUP for a configuration reload.
    #[cfg(unix)]
    pub fn listen_for_signals(&self) -> std::io::Result<JoinHandle<()>> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let lifecycle = self.clone();

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM");
                        lifecycle.request_shutdown();
                    }
                    _ = sigint.recv() => {
                        info!("Received SIGINT");
                        lifecycle.request_shutdown();
                    }
                    _ = sighup.recv() => {
                        info!("Received SIGHUP");
                        lifecycle.request_reload();
                    }
                }
            }
        }))
    }

    #[cfg(not(unix))]
    pub fn listen_for_signals(&self) -> std::io::Result<JoinHandle<()>> {
        let lifecycle = self.clone();
        Ok(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C");
                lifecycle.request_shutdown();
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_is_consumed() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.take_reload());

        lifecycle.request_reload();
        assert!(lifecycle.take_reload());
        assert!(!lifecycle.take_reload());
    }

    #[test]
    fn test_shutdown_is_sticky() {
        let lifecycle = Lifecycle::new();
        let handle = lifecycle.clone();
        handle.request_shutdown();

        assert!(lifecycle.shutdown_requested());
        assert!(lifecycle.shutdown_requested());
    }

    #[tokio::test]
    async fn test_request_before_wait_wakes_immediately() {
        let lifecycle = Lifecycle::new();
        lifecycle.request_shutdown();

        let started = std::time::Instant::now();
        lifecycle.wait(Duration::from_secs(30)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let lifecycle = Lifecycle::new();
        lifecycle.wait(Duration::from_millis(5)).await;
        assert!(!lifecycle.shutdown_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_shutdown_ignores_reload() {
        let lifecycle = Lifecycle::new();
        lifecycle.request_reload();

        let started = Instant::now();
        for _ in 0..3 {
            lifecycle.wait_for_shutdown(Duration::from_secs(10)).await;
        }

        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(!lifecycle.take_reload(), "reload should have been consumed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_shutdown_reload_mid_wait() {
        let lifecycle = Lifecycle::new();
        let handle = lifecycle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            handle.request_reload();
        });

        let started = Instant::now();
        lifecycle.wait_for_shutdown(Duration::from_secs(10)).await;
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_shutdown_ends_on_shutdown() {
        let lifecycle = Lifecycle::new();
        let handle = lifecycle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            handle.request_shutdown();
        });

        let started = Instant::now();
        lifecycle.wait_for_shutdown(Duration::from_secs(10)).await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(10));
        assert!(lifecycle.shutdown_requested());
    }
}
