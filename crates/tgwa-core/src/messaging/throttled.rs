use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    messaging::port::{EventSink, OutboundTransport},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* two sends.
    pub global_min_interval: Duration,
    /// Minimum spacing between sends to the same destination.
    pub per_destination_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(250),
            per_destination_min_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// OutboundTransport decorator that spaces out sends.
///
/// WhatsApp bans accounts that burst messages into many groups; fan-out of a
/// single post to N destinations goes through here. Lifecycle calls pass
/// straight through.
pub struct ThrottledTransport {
    inner: Arc<dyn OutboundTransport>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_destination: Mutex<HashMap<String, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledTransport {
    pub fn new(inner: Arc<dyn OutboundTransport>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_destination: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for(&self, address: &str) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_destination.lock().await;
        map.entry(address.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_destination_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle(&self, address: &str) {
        let global_wait = { self.global.lock().await.reserve() };
        let dest_wait = {
            let lim = self.limiter_for(address).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(dest_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl OutboundTransport for ThrottledTransport {
    async fn start(&self, events: EventSink) -> Result<()> {
        self.inner.start(events).await
    }

    async fn send_text(&self, address: &str, text: &str) -> Result<()> {
        self.throttle(address).await;
        self.inner.send_text(address, text).await
    }

    async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown().await
    }

    fn auth_dir(&self) -> Option<PathBuf> {
        self.inner.auth_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        sends: StdMutex<Vec<(String, Instant)>>,
    }

    #[async_trait::async_trait]
    impl OutboundTransport for Recorder {
        async fn start(&self, _events: EventSink) -> Result<()> {
            Ok(())
        }

        async fn send_text(&self, address: &str, _text: &str) -> Result<()> {
            self.sends
                .lock()
                .unwrap()
                .push((address.to_string(), Instant::now()));
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_sends_to_the_same_destination() {
        let rec = Arc::new(Recorder::default());
        let t = ThrottledTransport::new(
            rec.clone(),
            ThrottleConfig {
                global_min_interval: Duration::from_millis(0),
                per_destination_min_interval: Duration::from_millis(1000),
            },
        );

        t.send_text("1@g.us", "a").await.unwrap();
        t.send_text("2@g.us", "b").await.unwrap();
        t.send_text("1@g.us", "c").await.unwrap();

        let sends = rec.sends.lock().unwrap().clone();
        assert_eq!(sends.len(), 3);
        // Different destination is not held back.
        assert!(sends[1].1 - sends[0].1 < Duration::from_millis(1000));
        // Same destination waits for its slot.
        assert!(sends[2].1 - sends[0].1 >= Duration::from_millis(1000));
    }
}
