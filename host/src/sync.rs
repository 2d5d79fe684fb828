//! Outbound state pacing for the host
//!
//! The game loop may hand a snapshot to [`crate::network::GameHost::send_state`]
//! every frame; the [`StateSynchronizer`] decides which of those actually go on
//! the wire, quantizes them and stamps a sequence number. Projectile ids come
//! from a [`ProjectileIdAllocator`] so the client can diff them.

use shared::GameStateSnapshot;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Monotonic-clock gate allowing one send per interval
#[derive(Debug, Clone)]
pub struct SyncRateLimiter {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl SyncRateLimiter {
    pub fn new(target_hz: u32) -> Self {
        Self::from_interval(Duration::from_secs_f64(1.0 / target_hz.max(1) as f64))
    }

    pub fn from_interval(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        match self.last_sent {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    /// Claims the current slot if it is open.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if self.is_ready(now) {
            self.mark_sent(now);
            true
        } else {
            false
        }
    }
}

/// Turns game snapshots into wire snapshots at the target rate
#[derive(Debug, Clone)]
pub struct StateSynchronizer {
    limiter: SyncRateLimiter,
    next_sequence: u32,
}

impl StateSynchronizer {
    pub fn new(target_hz: u32) -> Self {
        Self {
            limiter: SyncRateLimiter::new(target_hz),
            next_sequence: 1,
        }
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.limiter.is_ready(now)
    }

    /// Quantized, sequenced copy of `snapshot`, or `None` inside the rate interval.
    pub fn prepare(&mut self, now: Instant, snapshot: &GameStateSnapshot) -> Option<GameStateSnapshot> {
        if !self.limiter.try_acquire(now) {
            return None;
        }

        let mut prepared = snapshot.quantized();
        prepared.sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        Some(prepared)
    }

    pub fn last_sequence(&self) -> u32 {
        self.next_sequence.wrapping_sub(1)
    }
}

/// Hands out non-zero projectile ids that are never reused while live
#[derive(Debug, Default)]
pub struct ProjectileIdAllocator {
    next: u32,
    live: HashSet<u32>,
}

impl ProjectileIdAllocator {
    pub fn new() -> Self {
        Self {
            next: 1,
            live: HashSet::new(),
        }
    }

    pub fn allocate(&mut self) -> u32 {
        loop {
            let id = self.next;
            self.next = self.next.wrapping_add(1);
            if id != 0 && self.live.insert(id) {
                return id;
            }
        }
    }

    /// Frees `id` for reuse once the projectile is gone. Returns false for unknown ids.
    pub fn release(&mut self, id: u32) -> bool {
        self.live.remove(&id)
    }

    pub fn is_live(&self, id: u32) -> bool {
        self.live.contains(&id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Forgets every live id, for a new round.
    pub fn reset(&mut self) {
        self.live.clear();
    }
}
