//! Variable-difficulty controller (spec §4.5): a per-port ring buffer of
//! inter-submit intervals driving periodic target retargets.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use log::debug;

/// Tunables for one listening port (spec §6, `ports.<port>.varDiff`).
#[derive(Debug, Clone, Copy)]
pub struct VarDiffConfig {
    pub target_time: Duration,
    pub retarget_time: Duration,
    pub variance_percent: f64,
    pub min_diff: f64,
    pub max_diff: f64,
}

/// One port's VarDiff state (spec §3 DATA MODEL, "VarDiff state").
pub struct VarDiff {
    config: VarDiffConfig,
    buffer: VecDeque<f64>,
    buffer_size: usize,
    last_ts: Option<Instant>,
    last_rtc: Option<Instant>,
    /// `None` until the Job Manager has processed its first new-block
    /// template (spec §9, "networkDifficulty...seeded only after the first
    /// processTemplate with a new block"). Until then, no upward retarget
    /// is applied — preserving the reference behavior's "cap effectively
    /// absent" quirk without ever driving a client's difficulty to zero.
    network_difficulty: Option<f64>,
    t_min: f64,
    t_max: f64,
}

impl VarDiff {
    pub fn new(config: VarDiffConfig) -> Self {
        let buffer_size = ((4.0 * config.retarget_time.as_secs_f64()) / config.target_time.as_secs_f64())
            .ceil()
            .max(1.0) as usize;
        let target_time = config.target_time.as_secs_f64();
        let t_min = target_time * (1.0 - config.variance_percent / 100.0);
        let t_max = target_time * (1.0 + config.variance_percent / 100.0);

        Self {
            config,
            buffer: VecDeque::with_capacity(buffer_size),
            buffer_size,
            last_ts: None,
            last_rtc: None,
            network_difficulty: None,
            t_min,
            t_max,
        }
    }

    /// Refreshed from the Job Manager's current job whenever a new block is
    /// processed (spec §4.5, last line).
    pub fn set_network_difficulty(&mut self, difficulty: f64) {
        self.network_difficulty = Some(difficulty);
    }

    /// Feeds one submission timestamp through the retarget algorithm
    /// (spec §4.5, steps 1-5). Returns the new difficulty if a retarget
    /// fired.
    pub fn on_submit(&mut self, now: Instant, client_difficulty: f64) -> Option<f64> {
        let (last_ts, last_rtc) = match (self.last_ts, self.last_rtc) {
            (Some(ts), Some(rtc)) => (ts, rtc),
            _ => {
                self.last_rtc = Some(
                    now.checked_sub(self.config.retarget_time / 2)
                        .unwrap_or(now),
                );
                self.last_ts = Some(now);
                self.buffer.clear();
                return None;
            }
        };

        let interval = now.saturating_duration_since(last_ts).as_secs_f64();
        self.push_interval(interval);
        self.last_ts = Some(now);

        if now.saturating_duration_since(last_rtc) < self.config.retarget_time && !self.buffer.is_empty() {
            return None;
        }
        self.last_rtc = Some(now);

        let avg = self.buffer.iter().sum::<f64>() / self.buffer.len() as f64;

        let factor = if avg > self.t_max && client_difficulty > self.config.min_diff {
            (self.config.min_diff / client_difficulty).max(0.5)
        } else if avg < self.t_min {
            match self.network_difficulty {
                Some(net) => (net.min(self.config.max_diff) / client_difficulty).min(2.0),
                None => return None,
            }
        } else {
            return None;
        };

        self.buffer.clear();
        let new_diff = client_difficulty * factor;
        debug!("vardiff retarget: {client_difficulty:.4} -> {new_diff:.4} (avg interval {avg:.2}s)");
        Some(new_diff)
    }

    fn push_interval(&mut self, interval: f64) {
        if self.buffer.len() >= self.buffer_size {
            self.buffer.pop_front();
        }
        self.buffer.push_back(interval);
    }
}

/// Owns one [`VarDiff`] per configured listening port.
pub struct VarDiffRegistry {
    ports: HashMap<u16, VarDiff>,
}

impl VarDiffRegistry {
    pub fn new() -> Self {
        Self {
            ports: HashMap::new(),
        }
    }

    pub fn register_port(&mut self, port: u16, config: VarDiffConfig) {
        self.ports.insert(port, VarDiff::new(config));
    }

    pub fn on_submit(&mut self, port: u16, now: Instant, client_difficulty: f64) -> Option<f64> {
        self.ports.get_mut(&port)?.on_submit(now, client_difficulty)
    }

    /// Propagates a new network difficulty to every registered port (spec
    /// §4.5, "networkDifficulty is refreshed...whenever a new block is
    /// processed").
    pub fn set_network_difficulty_for_all(&mut self, difficulty: f64) {
        for vardiff in self.ports.values_mut() {
            vardiff.set_network_difficulty(difficulty);
        }
    }
}

impl Default for VarDiffRegistry {
    fn default() -> Self {
        Self::new()
    }
}
