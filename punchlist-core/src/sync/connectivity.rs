//! Network reachability tracking.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Unknown,
    Reachable,
    Unreachable,
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reachability::Unknown => write!(f, "unknown"),
            Reachability::Reachable => write!(f, "online"),
            Reachability::Unreachable => write!(f, "offline"),
        }
    }
}

type Callback = Box<dyn Fn(Reachability) + Send + Sync>;

/// Turns a stream of reachability reports into transitions.
///
/// Registered callbacks run once per transition; repeated reports of the
/// current state are dropped.
pub struct ConnectivityMonitor {
    state: watch::Sender<Reachability>,
    callbacks: Mutex<Vec<Callback>>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Reachability::Unknown);
        Self {
            state,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> Reachability {
        *self.state.borrow()
    }

    /// Unknown counts as online so a pass is still attempted before the
    /// first probe answers.
    pub fn is_online(&self) -> bool {
        self.current() != Reachability::Unreachable
    }

    pub fn subscribe(&self) -> watch::Receiver<Reachability> {
        self.state.subscribe()
    }

    pub fn on_change(&self, callback: impl Fn(Reachability) + Send + Sync + 'static) {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(Box::new(callback));
        }
    }

    /// Records a reachability observation. Returns true if it was a transition.
    pub fn report(&self, reachable: bool) -> bool {
        let next = if reachable {
            Reachability::Reachable
        } else {
            Reachability::Unreachable
        };
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if !changed {
            return false;
        }

        tracing::info!(state = %next, "Connectivity changed");
        if let Ok(callbacks) = self.callbacks.lock() {
            for callback in callbacks.iter() {
                callback(next);
            }
        }
        true
    }
}

/// Something that can tell whether the server is reachable right now.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Probes on a fixed interval and feeds the results into `monitor` until
/// `shutdown` flips to true or its sender is dropped.
pub async fn run_probe_loop(
    probe: Arc<dyn ConnectivityProbe>,
    monitor: Arc<ConnectivityMonitor>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reachable = probe.probe().await;
                monitor.report(reachable);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::debug!("Connectivity probe loop stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_callbacks_fire_once_per_transition() {
        let monitor = ConnectivityMonitor::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        monitor.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(monitor.report(true));
        assert!(!monitor.report(true));
        assert!(monitor.report(false));
        assert!(!monitor.report(false));
        assert!(!monitor.report(false));
        assert!(monitor.report(true));

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unknown_counts_as_online() {
        let monitor = ConnectivityMonitor::new();
        assert_eq!(monitor.current(), Reachability::Unknown);
        assert!(monitor.is_online());
        monitor.report(false);
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_subscribe_sees_transitions() {
        let monitor = ConnectivityMonitor::new();
        let mut rx = monitor.subscribe();
        monitor.report(false);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Reachability::Unreachable);
    }

    struct FlagProbe(AtomicBool);

    #[async_trait]
    impl ConnectivityProbe for FlagProbe {
        async fn probe(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_probe_loop_reports_and_stops() {
        let monitor = Arc::new(ConnectivityMonitor::new());
        let probe = Arc::new(FlagProbe(AtomicBool::new(true)));
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut state = monitor.subscribe();

        let handle = tokio::spawn(run_probe_loop(
            probe,
            monitor.clone(),
            Duration::from_millis(10),
            stop_rx,
        ));

        state.changed().await.unwrap();
        assert_eq!(*state.borrow(), Reachability::Reachable);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
