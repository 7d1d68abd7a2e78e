//! # Device Queue
//!
//! FIFO of mount events waiting for a device session.
//!
//! ## Overview
//!
//! - **Deduplication**: a mount path is queued at most once while pending
//! - **Ordering**: first detected, first processed
//!
//! The queue is owned by the orchestrator's control loop; producers reach
//! it through the loop's command channel, never directly.

use bridge_traits::MountEvent;
use std::collections::VecDeque;
use std::path::Path;

#[derive(Debug, Default)]
pub struct DeviceQueue {
    entries: VecDeque<MountEvent>,
}

impl DeviceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `event` unless its mount path is already pending.
    ///
    /// Returns `true` when the event was admitted.
    pub fn push(&mut self, event: MountEvent) -> bool {
        if self.contains(&event.mount_path) {
            return false;
        }
        self.entries.push_back(event);
        true
    }

    pub fn pop(&mut self) -> Option<MountEvent> {
        self.entries.pop_front()
    }

    pub fn contains(&self, mount_path: &Path) -> bool {
        self.entries.iter().any(|e| e.mount_path == mount_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return every pending entry.
    pub fn drain(&mut self) -> Vec<MountEvent> {
        self.entries.drain(..).collect()
    }
}
