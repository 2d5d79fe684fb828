//! Client input collection with edge detection and batched flushing
//!
//! The game loop reports key transitions with [`InputChannel::press`] and
//! [`InputChannel::release`]. The network task drains the pending changes
//! into one `PlayerInput` message per flush and is woken as soon as anything
//! is queued.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct InputBuffers {
    current: HashSet<String>,
    pending_pressed: BTreeSet<String>,
    pending_released: BTreeSet<String>,
}

/// Key changes taken out of the channel by one flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputBatch {
    pub pressed: Vec<String>,
    pub released: Vec<String>,
}

/// Shared handle between the game loop and the client network task
#[derive(Debug, Clone, Default)]
pub struct InputChannel {
    buffers: Arc<Mutex<InputBuffers>>,
    wake: Arc<Notify>,
}

impl InputChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InputBuffers> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a key going down. Returns false if it was already held.
    pub fn press(&self, key: &str) -> bool {
        {
            let mut buffers = self.lock();
            if !buffers.current.insert(key.to_string()) {
                return false;
            }
            buffers.pending_released.remove(key);
            buffers.pending_pressed.insert(key.to_string());
        }

        self.wake.notify_one();
        true
    }

    /// Records a key going up. Returns false if it was not held.
    ///
    /// A press and release inside the same flush window leave only the
    /// release pending, so the host ends up with the key up either way.
    pub fn release(&self, key: &str) -> bool {
        {
            let mut buffers = self.lock();
            if !buffers.current.remove(key) {
                return false;
            }
            buffers.pending_pressed.remove(key);
            buffers.pending_released.insert(key.to_string());
        }

        self.wake.notify_one();
        true
    }

    /// Atomically takes both pending sets; `None` when nothing changed.
    pub fn drain(&self) -> Option<InputBatch> {
        let mut buffers = self.lock();
        if buffers.pending_pressed.is_empty() && buffers.pending_released.is_empty() {
            return None;
        }

        Some(InputBatch {
            pressed: std::mem::take(&mut buffers.pending_pressed).into_iter().collect(),
            released: std::mem::take(&mut buffers.pending_released).into_iter().collect(),
        })
    }

    pub fn has_pending(&self) -> bool {
        let buffers = self.lock();
        !buffers.pending_pressed.is_empty() || !buffers.pending_released.is_empty()
    }

    pub fn current_keys(&self) -> HashSet<String> {
        self.lock().current.clone()
    }

    /// Held keys in a stable order, for the periodic resync.
    pub fn held_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().current.iter().cloned().collect();
        keys.sort();
        keys
    }

    pub fn clear(&self) {
        let mut buffers = self.lock();
        buffers.current.clear();
        buffers.pending_pressed.clear();
        buffers.pending_released.clear();
    }

    /// Resolves once input has been queued since the last wake-up.
    pub async fn queued(&self) {
        self.wake.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_press_and_drain() {
        let input = InputChannel::new();
        assert!(input.drain().is_none());

        assert!(input.press("W"));
        assert!(input.press("SPACE"));

        let batch = input.drain().unwrap();
        assert_eq!(batch.pressed, keys(&["SPACE", "W"]));
        assert!(batch.released.is_empty());

        assert!(input.drain().is_none());
        assert_eq!(input.current_keys().len(), 2);
    }

    #[test]
    fn test_repeated_press_is_noop() {
        let input = InputChannel::new();
        assert!(input.press("W"));
        input.drain();

        assert!(!input.press("W"));
        assert!(input.drain().is_none());
    }

    #[test]
    fn test_release_of_unheld_key_is_noop() {
        let input = InputChannel::new();
        assert!(!input.release("W"));
        assert!(!input.has_pending());
    }

    #[test]
    fn test_press_release_in_same_window_keeps_release() {
        let input = InputChannel::new();
        input.press("W");
        input.release("W");

        let batch = input.drain().unwrap();
        assert!(batch.pressed.is_empty());
        assert_eq!(batch.released, keys(&["W"]));
        assert!(input.current_keys().is_empty());
    }

    #[test]
    fn test_release_then_press_in_same_window() {
        let input = InputChannel::new();
        input.press("A");
        input.drain();

        input.release("A");
        input.press("A");

        let batch = input.drain().unwrap();
        assert_eq!(batch.pressed, keys(&["A"]));
        assert!(batch.released.is_empty());
        assert!(input.current_keys().contains("A"));
    }

    #[test]
    fn test_held_keys_sorted() {
        let input = InputChannel::new();
        input.press("W");
        input.press("D");
        input.press("SPACE");
        assert_eq!(input.held_keys(), keys(&["D", "SPACE", "W"]));
    }

    #[test]
    fn test_clear() {
        let input = InputChannel::new();
        input.press("W");
        input.clear();

        assert!(input.current_keys().is_empty());
        assert!(input.drain().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let game_side = InputChannel::new();
        let network_side = game_side.clone();

        game_side.press("W");
        assert_eq!(network_side.drain().unwrap().pressed, keys(&["W"]));
    }

    #[tokio::test]
    async fn test_press_wakes_waiter() {
        let input = InputChannel::new();
        let waiter = input.clone();

        let handle = tokio::spawn(async move { waiter.queued().await });
        input.press("W");

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter not woken")
            .unwrap();
    }
}
