//! Managed-frame table and scheduler. Grounded in
//! `original_source/rctmon/managed_frame.py` and
//! `original_source/rctmon/device_manager.py::payloads()`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::frame::encode_read_request;
use crate::registry::ObjectInfo;

/// A managed frame: per-object polling bookkeeping plus its precomputed
/// request payload.
#[derive(Debug, Clone)]
pub struct ManagedFrame {
    pub oinfo: ObjectInfo,
    pub interval: Duration,
    pub last_sent: Option<Instant>,
    pub last_received: Option<Instant>,
    pub in_flight: bool,
    pub is_inventory: bool,
    request_payload: Vec<u8>,
}

impl ManagedFrame {
    pub fn new(oinfo: ObjectInfo, interval: Duration, is_inventory: bool) -> Self {
        let request_payload = encode_read_request(oinfo.id);
        Self {
            oinfo,
            interval,
            last_sent: None,
            last_received: None,
            in_flight: false,
            is_inventory,
            request_payload,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.request_payload
    }
}

/// Counters the scheduler bumps as a side effect of walking the table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedulerOutcome {
    pub normal_losses: u64,
    pub inventory_losses: u64,
    pub frames_sent: u64,
}

/// Table of managed frames, keyed by object id. Owned exclusively by the
/// connection loop (spec.md §5).
#[derive(Debug, Default)]
pub struct FrameTable {
    frames: HashMap<u32, ManagedFrame>,
    /// Object ids that were added as part of inventory discovery, used by
    /// [`FrameTable::clear_inventory`] to roll back to the bootstrap state.
    inventory_ids: Vec<u32>,
}

impl FrameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, oid: u32) -> bool {
        self.frames.contains_key(&oid)
    }

    /// Enrolls an object for polling. `tracked_as_inventory` mirrors the
    /// original's `inventory=True` argument: it records the id so a later
    /// [`clear_inventory`](Self::clear_inventory) removes it, independent of
    /// whether the frame itself is a one-shot (`is_inventory`) frame.
    pub fn enroll(&mut self, oinfo: ObjectInfo, interval: Duration, tracked_as_inventory: bool, is_inventory: bool) {
        self.frames.insert(oinfo.id, ManagedFrame::new(oinfo, interval, is_inventory));
        if tracked_as_inventory {
            self.inventory_ids.push(oinfo.id);
        }
    }

    pub fn get(&self, oid: u32) -> Option<&ManagedFrame> {
        self.frames.get(&oid)
    }

    /// Marks a frame as having received a response.
    pub fn mark_arrival(&mut self, oid: u32, now: Instant) -> bool {
        match self.frames.get_mut(&oid) {
            Some(frame) => {
                frame.last_received = Some(now);
                frame.in_flight = false;
                true
            }
            None => false,
        }
    }

    /// Removes every dynamically enrolled id, keeping only the bootstrap
    /// description frame (spec.md §3 Lifecycle, §8 "After a disconnect...").
    pub fn clear_inventory(&mut self) {
        for oid in self.inventory_ids.drain(..) {
            self.frames.remove(&oid);
        }
    }

    /// Walks the table oldest-`last_sent`-first and returns the concatenated
    /// request payload for every object eligible to be (re)sent this tick,
    /// per spec.md §4.2.
    pub fn payloads(&mut self, now: Instant) -> (Vec<u8>, SchedulerOutcome) {
        let mut outcome = SchedulerOutcome::default();
        let mut order: Vec<u32> = self.frames.keys().copied().collect();
        order.sort_by_key(|oid| self.frames[oid].last_sent.map(|t| (t, *oid)));

        let mut staging = Vec::new();
        for oid in order {
            let frame = self.frames.get_mut(&oid).expect("oid came from this map");
            if !frame.is_inventory {
                if frame.in_flight {
                    if let Some(last_sent) = frame.last_sent {
                        if now.saturating_duration_since(last_sent) >= frame.interval * 3 {
                            outcome.normal_losses += 1;
                            frame.in_flight = false;
                        }
                    }
                }
                let due = match frame.last_sent {
                    None => true,
                    Some(last_sent) => now.saturating_duration_since(last_sent) >= frame.interval,
                };
                if due && !frame.in_flight {
                    staging.push(oid);
                }
            } else {
                if frame.last_received.is_some() {
                    continue;
                }
                let overdue = match frame.last_sent {
                    None => true,
                    Some(last_sent) => now.saturating_duration_since(last_sent) >= Duration::from_secs(30),
                };
                if overdue {
                    if frame.in_flight {
                        outcome.inventory_losses += 1;
                    }
                    staging.push(oid);
                }
            }
        }

        let mut data = Vec::new();
        for oid in &staging {
            let frame = self.frames.get_mut(oid).expect("oid came from this map");
            frame.last_sent = Some(now);
            frame.in_flight = true;
            data.extend_from_slice(frame.payload());
        }
        outcome.frames_sent = staging.len() as u64;
        (data, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;
    use crate::value::DataType;

    fn info(id: u32) -> ObjectInfo {
        ObjectInfo { id, name: "test", data_type: DataType::Float }
    }

    #[test]
    fn non_inventory_eligible_after_interval_elapses() {
        let mut table = FrameTable::new();
        table.enroll(info(1), Duration::from_secs(10), false, false);
        let t0 = Instant::now();
        let (data, outcome) = table.payloads(t0);
        assert!(!data.is_empty());
        assert_eq!(outcome.frames_sent, 1);
        assert!(table.get(1).unwrap().in_flight);

        let (data, outcome) = table.payloads(t0 + Duration::from_secs(5));
        assert!(data.is_empty(), "still in flight, not yet due");
        assert_eq!(outcome.frames_sent, 0);
    }

    #[test]
    fn loss_detected_at_three_times_interval() {
        let mut table = FrameTable::new();
        table.enroll(info(2), Duration::from_secs(10), false, false);
        let t0 = Instant::now();
        table.payloads(t0);
        assert!(table.get(2).unwrap().in_flight);

        let (data, outcome) = table.payloads(t0 + Duration::from_secs(30));
        assert_eq!(outcome.normal_losses, 1);
        assert!(!data.is_empty(), "frame becomes eligible again immediately");
    }

    #[test]
    fn inventory_frame_resent_after_30s_and_counts_as_loss_while_in_flight() {
        let mut table = FrameTable::new();
        table.enroll(info(3), Duration::from_secs(0), true, true);
        let t0 = Instant::now();
        let (_, outcome) = table.payloads(t0);
        assert_eq!(outcome.frames_sent, 1);

        let (_, outcome) = table.payloads(t0 + Duration::from_secs(10));
        assert_eq!(outcome.frames_sent, 0, "not yet overdue");

        let (data, outcome) = table.payloads(t0 + Duration::from_secs(31));
        assert_eq!(outcome.inventory_losses, 1);
        assert!(!data.is_empty());
    }

    #[test]
    fn inventory_frame_not_resent_once_received() {
        let mut table = FrameTable::new();
        table.enroll(info(4), Duration::from_secs(0), true, true);
        let t0 = Instant::now();
        table.payloads(t0);
        table.mark_arrival(4, t0 + Duration::from_secs(1));

        let (data, outcome) = table.payloads(t0 + Duration::from_secs(60));
        assert!(data.is_empty());
        assert_eq!(outcome.frames_sent, 0);
    }

    #[test]
    fn clear_inventory_keeps_only_untracked_entries() {
        let mut table = FrameTable::new();
        table.enroll(info(5), Duration::from_secs(0), false, true); // bootstrap: not tracked as inventory
        table.enroll(info(6), Duration::from_secs(10), true, false);
        table.clear_inventory();
        assert!(table.contains(5));
        assert!(!table.contains(6));
    }

    #[test]
    fn registry_lookup_is_used_for_real_objects_elsewhere() {
        assert!(registry::get_by_name("inverter_sn").is_some());
    }
}
