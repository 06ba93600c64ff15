//! Fixed-capacity LRU frame cache.
//!
//! The cache maps `(cartridge, frame)` to a copy of the frame's 1024 bytes.
//! Recency is a logical clock rather than wall time, so eviction order is
//! fully determined by the sequence of calls.
//!
//! Victim selection and removal are separate calls: the driver asks for the
//! victim, removes it (getting the last contents back), then inserts the new
//! frame into the freed slot.

use log::trace;

use crate::error::{CartError, CartResult};
use crate::{FrameAddr, FrameBuf, DEFAULT_CACHE_FRAMES, FRAME_SIZE};

/// One cache entry. `stamp == None` marks the slot empty.
#[derive(Clone)]
struct CacheSlot {
    stamp: Option<u64>,
    addr: FrameAddr,
    data: FrameBuf,
}

impl CacheSlot {
    fn empty() -> Self {
        Self {
            stamp: None,
            addr: FrameAddr::default(),
            data: [0; FRAME_SIZE],
        }
    }

    fn holds(&self, addr: FrameAddr) -> bool {
        self.stamp.is_some() && self.addr == addr
    }
}

/// Slot chosen by [`FrameCache::eviction_victim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Victim {
    /// An empty slot exists; nothing needs evicting.
    Vacant(usize),
    /// Least recently used occupied frame.
    Occupied(FrameAddr),
}

/// LRU frame cache with a fixed number of slots.
pub struct FrameCache {
    capacity: usize,
    slots: Vec<CacheSlot>,
    occupied: usize,
    open: bool,
    clock: u64,
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_FRAMES)
    }
}

impl FrameCache {
    /// Create a closed cache that will hold `capacity` frames once opened.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Vec::new(),
            occupied: 0,
            open: false,
            clock: 0,
        }
    }

    /// Set the number of slots. Takes effect on the next [`open`](Self::open).
    ///
    /// Changing the capacity while frames are cached is a caller error and
    /// is rejected with [`CartError::CacheBusy`].
    pub fn set_capacity(&mut self, capacity: usize) -> CartResult<()> {
        if self.occupied > 0 {
            return Err(CartError::CacheBusy);
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Reset every slot to empty and mark the cache open.
    pub fn open(&mut self) {
        self.reset();
        self.open = true;
    }

    /// Reset every slot to empty and mark the cache closed.
    ///
    /// Nothing is flushed: every write already went through to the device.
    pub fn close(&mut self) {
        self.reset();
        self.open = false;
    }

    fn reset(&mut self) {
        self.slots.clear();
        self.slots.resize(self.capacity, CacheSlot::empty());
        self.occupied = 0;
    }

    fn tick(&mut self) -> u64 {
        let now = self.clock;
        self.clock += 1;
        now
    }

    fn position(&self, addr: FrameAddr) -> Option<usize> {
        self.slots.iter().position(|slot| slot.holds(addr))
    }

    /// Look up a frame, refreshing its recency on a hit.
    ///
    /// Misses advance the clock as well. The returned buffer borrows the
    /// cache, so it cannot outlive the next mutation.
    pub fn lookup(&mut self, addr: FrameAddr) -> Option<&mut FrameBuf> {
        let now = self.tick();
        match self.position(addr) {
            Some(idx) => {
                trace!("cache hit {} (slot {})", addr, idx);
                let slot = &mut self.slots[idx];
                slot.stamp = Some(now);
                Some(&mut slot.data)
            }
            None => {
                trace!("cache miss {}", addr);
                None
            }
        }
    }

    /// Check residency without touching recency or the clock.
    pub fn contains(&self, addr: FrameAddr) -> bool {
        self.position(addr).is_some()
    }

    /// Store a frame in the first empty slot.
    ///
    /// Returns false (and changes nothing) when no slot is empty; callers
    /// must evict first.
    pub fn insert(&mut self, addr: FrameAddr, data: &FrameBuf) -> bool {
        if !self.open {
            return false;
        }
        let Some(idx) = self.slots.iter().position(|slot| slot.stamp.is_none()) else {
            return false;
        };
        let now = self.tick();
        let slot = &mut self.slots[idx];
        slot.stamp = Some(now);
        slot.addr = addr;
        slot.data.copy_from_slice(data);
        self.occupied += 1;
        trace!("cache insert {} (slot {}, {} occupied)", addr, idx, self.occupied);
        true
    }

    /// Overwrite a cached frame and refresh its recency.
    /// Returns false if the frame is not cached.
    pub fn update(&mut self, addr: FrameAddr, data: &FrameBuf) -> bool {
        let Some(idx) = self.position(addr) else {
            return false;
        };
        let now = self.tick();
        let slot = &mut self.slots[idx];
        slot.stamp = Some(now);
        slot.data.copy_from_slice(data);
        true
    }

    /// The slot with the oldest stamp, lowest index first on ties.
    ///
    /// Empty slots sort below every occupied slot, so a vacancy is reported
    /// whenever one exists. Returns `None` only for a zero-capacity cache.
    pub fn eviction_victim(&self) -> Option<Victim> {
        let (idx, slot) = self
            .slots
            .iter()
            .enumerate()
            .min_by_key(|(_, slot)| slot.stamp)?;
        Some(match slot.stamp {
            None => Victim::Vacant(idx),
            Some(_) => Victim::Occupied(slot.addr),
        })
    }

    /// Drop a frame from the cache, returning its last contents.
    pub fn remove(&mut self, addr: FrameAddr) -> Option<FrameBuf> {
        let idx = self.position(addr)?;
        let slot = &mut self.slots[idx];
        slot.stamp = None;
        self.occupied -= 1;
        trace!("cache evict {} (slot {})", addr, idx);
        Some(slot.data)
    }

    /// Configured number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots holding a frame.
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    /// True when every slot holds a frame.
    pub fn is_full(&self) -> bool {
        self.occupied >= self.slots.len()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}
