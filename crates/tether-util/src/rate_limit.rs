//! Per-client request throttling for the IPC surface

use std::collections::HashMap;
use std::time::Duration;

use crate::{ClientId, MonotonicInstant};

/// Fixed-window request budget per client.
#[derive(Debug)]
pub struct RateLimiter {
    budget: u32,
    window: Duration,
    clients: HashMap<ClientId, Window>,
}

#[derive(Debug)]
struct Window {
    started: MonotonicInstant,
    used: u32,
}

impl RateLimiter {
    /// Allow `budget` requests per client in each `window`.
    pub fn new(budget: u32, window: Duration) -> Self {
        Self {
            budget,
            window,
            clients: HashMap::new(),
        }
    }

    /// Returns `true` if the request is allowed.
    pub fn check(&mut self, client_id: &ClientId) -> bool {
        self.check_at(client_id, MonotonicInstant::now())
    }

    pub fn check_at(&mut self, client_id: &ClientId, now: MonotonicInstant) -> bool {
        let window = self.clients.entry(*client_id).or_insert(Window {
            started: now,
            used: 0,
        });

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.used = 0;
        }

        if window.used < self.budget {
            window.used += 1;
            true
        } else {
            false
        }
    }

    pub fn remove_client(&mut self, client_id: &ClientId) {
        self.clients.remove(client_id);
    }
}
