use crate::chunk::chunk_selective_ack::GapAckBlock;
use crate::util::*;

use std::collections::VecDeque;

/// Largest distance ahead of the cumulative TSN we are willing to track
pub(crate) const MAX_TSN_GAP: u32 = 4096;

/// Result of checking an inbound TSN against the map
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TsnStatus {
    /// not yet received, inside the tracking window
    New,
    /// already received
    Duplicate,
    /// too far ahead of the cumulative TSN to be tracked
    BeyondWindow,
}

/// TsnMap records which of the peer's TSNs have arrived.
///
/// `window[i]` tracks TSN `cumulative_tsn + 1 + i`. The front of the window
/// is popped as soon as it is received, so the front is always a hole.
#[derive(Debug, Default, Clone)]
pub struct TsnMap {
    cumulative_tsn: u32,
    max_tsn_seen: u32,
    window: VecDeque<bool>,
}

impl TsnMap {
    pub fn new(initial_tsn: u32) -> Self {
        let cumulative_tsn = initial_tsn.wrapping_sub(1);
        TsnMap {
            cumulative_tsn,
            max_tsn_seen: cumulative_tsn,
            window: VecDeque::new(),
        }
    }

    /// Highest TSN below which everything has been received
    pub fn cumulative_ack(&self) -> u32 {
        self.cumulative_tsn
    }

    pub fn highest_seen(&self) -> u32 {
        self.max_tsn_seen
    }

    /// Is there a hole between the cumulative ack point and the highest TSN seen?
    pub fn has_gap(&self) -> bool {
        self.cumulative_tsn != self.max_tsn_seen
    }

    pub fn check(&self, tsn: u32) -> TsnStatus {
        if sna32lte(tsn, self.cumulative_tsn) {
            return TsnStatus::Duplicate;
        }

        let offset = tsn.wrapping_sub(self.cumulative_tsn).wrapping_sub(1);
        if offset >= MAX_TSN_GAP {
            return TsnStatus::BeyondWindow;
        }

        match self.window.get(offset as usize) {
            Some(true) => TsnStatus::Duplicate,
            _ => TsnStatus::New,
        }
    }

    /// Marks `tsn` as received. Returns false for duplicates and TSNs outside
    /// of the tracking window.
    pub fn mark(&mut self, tsn: u32) -> bool {
        if self.check(tsn) != TsnStatus::New {
            return false;
        }

        let offset = tsn.wrapping_sub(self.cumulative_tsn).wrapping_sub(1) as usize;
        if self.window.len() <= offset {
            self.window.resize(offset + 1, false);
        }
        self.window[offset] = true;

        if sna32gt(tsn, self.max_tsn_seen) {
            self.max_tsn_seen = tsn;
        }

        while let Some(true) = self.window.front() {
            self.window.pop_front();
            self.cumulative_tsn = self.cumulative_tsn.wrapping_add(1);
        }

        true
    }

    /// Gap ack blocks relative to the cumulative TSN, as carried in a SACK
    pub fn gap_ack_blocks(&self) -> Vec<GapAckBlock> {
        let mut blocks = vec![];
        let mut start: Option<usize> = None;

        for (i, received) in self.window.iter().enumerate() {
            match (received, start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    blocks.push(GapAckBlock {
                        start: (s + 1) as u16,
                        end: i as u16,
                    });
                    start = None;
                }
                _ => {}
            }
        }

        if let Some(s) = start {
            blocks.push(GapAckBlock {
                start: (s + 1) as u16,
                end: self.window.len() as u16,
            });
        }

        blocks
    }
}
