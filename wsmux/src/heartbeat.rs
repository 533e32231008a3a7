//! Ping/pong keepalive timer.
//!
//! Pure state: the owner feeds it the current time and acts on the returned
//! [`Beat`]. Nothing here touches a transport.

use crate::config::HeartbeatConfig;

/// What the owner should do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    Idle,
    SendPing,
    /// Too many pongs missed in a row; drop the connection.
    Expired,
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    last_ping: u64,
    pong_deadline: Option<u64>,
    missed: u32,
}

impl Heartbeat {
    pub fn new(config: HeartbeatConfig, now: u64) -> Self {
        Self { config, last_ping: now, pong_deadline: None, missed: 0 }
    }

    /// Re-arm from scratch, e.g. after a (re)connect.
    pub fn reset(&mut self, now: u64) {
        self.last_ping = now;
        self.pong_deadline = None;
        self.missed = 0;
    }

    pub fn on_pong(&mut self) {
        self.pong_deadline = None;
        self.missed = 0;
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }

    pub fn poll(&mut self, now: u64) -> Beat {
        if let Some(deadline) = self.pong_deadline {
            if now >= deadline {
                self.pong_deadline = None;
                self.missed += 1;
                trace_debug!("pong missed ({}/{})", self.missed, self.config.disconnect_after);
                if self.config.disconnect_after > 0 && self.missed >= self.config.disconnect_after {
                    return Beat::Expired;
                }
                // retry right away instead of waiting out another interval
                self.last_ping = now;
                self.pong_deadline = Some(now + self.config.pong_timeout_ms);
                return Beat::SendPing;
            }
        }

        if now.saturating_sub(self.last_ping) >= self.config.ping_interval_ms {
            self.last_ping = now;
            if self.pong_deadline.is_none() {
                self.pong_deadline = Some(now + self.config.pong_timeout_ms);
            }
            return Beat::SendPing;
        }
        Beat::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat() -> Heartbeat {
        Heartbeat::new(HeartbeatConfig::new(1000, 300, 2), 0)
    }

    #[test]
    fn test_ping_on_interval() {
        let mut hb = heartbeat();
        assert_eq!(hb.poll(999), Beat::Idle);
        assert_eq!(hb.poll(1000), Beat::SendPing);
        hb.on_pong();
        assert_eq!(hb.poll(1500), Beat::Idle);
        assert_eq!(hb.poll(2000), Beat::SendPing);
    }

    #[test]
    fn test_misses_expire() {
        let mut hb = heartbeat();
        assert_eq!(hb.poll(1000), Beat::SendPing);
        assert_eq!(hb.poll(1299), Beat::Idle);
        assert_eq!(hb.poll(1300), Beat::SendPing);
        assert_eq!(hb.missed(), 1);
        assert_eq!(hb.poll(1600), Beat::Expired);
        assert_eq!(hb.missed(), 2);
    }

    #[test]
    fn test_pong_resets_miss_count() {
        let mut hb = heartbeat();
        hb.poll(1000);
        hb.poll(1300);
        assert_eq!(hb.missed(), 1);
        hb.on_pong();
        assert_eq!(hb.missed(), 0);
        assert_eq!(hb.poll(1400), Beat::Idle);
    }

    #[test]
    fn test_zero_disconnect_count_never_expires() {
        let mut hb = Heartbeat::new(HeartbeatConfig::new(100, 10, 0), 0);
        for step in 1..50 {
            assert_ne!(hb.poll(step * 100), Beat::Expired);
        }
    }

    #[test]
    fn test_reset() {
        let mut hb = heartbeat();
        hb.poll(1000);
        hb.poll(1300);
        hb.reset(5000);
        assert_eq!(hb.missed(), 0);
        assert_eq!(hb.poll(5999), Beat::Idle);
    }
}
