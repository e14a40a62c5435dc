//! Global subscription-id counter (spec §4.4, "Subscription id").

/// Produces `"deadbeefcafebabe" ‖ int64LE(n).hex()`. The reference
/// implementation wraps at `Number.MAX_VALUE`; a plain wrapping `u64` is the
/// idiomatic equivalent (practically unreachable either way).
pub struct SubscriptionCounter {
    counter: u64,
}

impl SubscriptionCounter {
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    pub fn next(&mut self) -> String {
        let n = self.counter;
        self.counter = self.counter.wrapping_add(1);
        format!("deadbeefcafebabe{}", hex::encode(n.to_le_bytes()))
    }
}

impl Default for SubscriptionCounter {
    fn default() -> Self {
        Self::new()
    }
}
