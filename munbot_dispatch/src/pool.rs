//! Credential slot bookkeeping and round-robin selection.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Health and error bookkeeping for one API credential.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SlotStatus {
    /// Stable identity, 0-based
    pub index: usize,
    pub healthy: bool,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
}

impl SlotStatus {
    const fn new(index: usize) -> Self {
        Self {
            index,
            healthy: true,
            error_count: 0,
            last_error: None,
            last_used: None,
        }
    }
}

/// Round-robin pool of credential slots with a per-slot error threshold.
///
/// When every slot is unhealthy the pool resets itself instead of refusing
/// to hand out a slot, so a burst of failures never locks the caller out.
#[derive(Debug)]
pub struct KeyPool {
    slots: Vec<SlotStatus>,
    cursor: usize,
    error_threshold: u32,
}

impl KeyPool {
    /// Returns `None` for an empty pool.
    #[must_use]
    pub fn new(len: usize, error_threshold: u32) -> Option<Self> {
        if len == 0 {
            return None;
        }
        Some(Self {
            slots: (0..len).map(SlotStatus::new).collect(),
            cursor: 0,
            error_threshold: error_threshold.max(1),
        })
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub const fn error_threshold(&self) -> u32 {
        self.error_threshold
    }

    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&SlotStatus> {
        self.slots.get(index)
    }

    #[must_use]
    pub fn slots(&self) -> &[SlotStatus] {
        &self.slots
    }

    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.healthy).count()
    }

    /// Select the next slot and advance the cursor past it.
    pub fn pick_slot(&mut self) -> usize {
        let len = self.slots.len();

        if self.healthy_count() == 0 {
            warn!("All API keys unhealthy, resetting health status (circuit breaker)");
            for slot in &mut self.slots {
                slot.healthy = true;
                slot.error_count = 0;
            }
            let chosen = self.cursor;
            self.cursor = (chosen + 1) % len;
            return chosen;
        }

        let chosen = (0..len)
            .map(|offset| (self.cursor + offset) % len)
            .find(|&index| self.slots[index].healthy)
            .unwrap_or(self.cursor);
        self.cursor = (chosen + 1) % len;
        chosen
    }

    /// Refresh the last-used timestamp.
    pub fn touch(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.last_used = Some(Utc::now());
        }
    }

    /// Record a failure. Returns `true` if this failure flipped the slot to
    /// unhealthy.
    pub fn mark_failure(&mut self, index: usize, error: &str) -> bool {
        let threshold = self.error_threshold;
        let Some(slot) = self.slots.get_mut(index) else {
            return false;
        };

        slot.error_count = slot.error_count.saturating_add(1);
        slot.last_error = Some(error.to_string());

        if slot.healthy && slot.error_count >= threshold {
            slot.healthy = false;
            warn!(
                "API key {} marked as unhealthy after {} errors",
                index + 1,
                slot.error_count
            );
            return true;
        }
        false
    }

    /// Record a successful send.
    pub fn mark_success(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.error_count = slot.error_count.saturating_sub(1);
            slot.last_used = Some(Utc::now());
        }
    }

    /// Health probe succeeded: back in rotation with one error forgiven.
    pub fn restore(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.healthy = true;
            slot.error_count = slot.error_count.saturating_sub(1);
        }
    }

    /// Operator override: healthy with a clean record.
    pub fn mark_healthy(&mut self, index: usize) -> bool {
        let Some(slot) = self.slots.get_mut(index) else {
            return false;
        };
        slot.healthy = true;
        slot.error_count = 0;
        slot.last_error = None;
        info!("API key {} manually marked as healthy", index + 1);
        true
    }

    /// Forgive one error on every slot.
    pub fn decay_errors(&mut self) {
        for slot in &mut self.slots {
            slot.error_count = slot.error_count.saturating_sub(1);
        }
    }

    pub const fn reset_cursor(&mut self) {
        self.cursor = 0;
    }
}
