//! Storage translation layer.
//!
//! `CartDriver` owns the file table and the frame arena, and turns
//! `(handle, offset, length)` requests into per-frame operations against the
//! frame cache and, on a miss, the device transport.
//!
//! Every file is a singly linked chain of frames, one frame per 1024 bytes of
//! content. Frame records live in a fixed arena indexed by
//! `(cartridge, frame)`; links between them are coordinates.

use std::fmt;

use log::{debug, trace, warn};

use crate::cache::{FrameCache, Victim};
use crate::config::CartConfig;
use crate::error::{CartError, CartResult};
use crate::register::{CartRegister, Opcode};
use crate::transport::CartTransport;
use crate::{FrameAddr, FrameBuf, FRAME_SIZE};

/// Opaque file handle (index into the file table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle(u16);

impl FileHandle {
    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-frame bookkeeping. A frame with no owner is free.
#[derive(Debug, Clone, Default)]
struct FrameRecord {
    owner: Option<FileHandle>,
    used: usize,
    next: Option<FrameAddr>,
}

/// File table entry.
#[derive(Debug, Clone)]
struct FileEntry {
    name: String,
    open: bool,
    length: u32,
    position: u32,
    head: Option<FrameAddr>,
}

impl FileEntry {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            open: true,
            length: 0,
            position: 0,
            head: None,
        }
    }
}

/// Cartridge storage driver.
pub struct CartDriver<T: CartTransport> {
    config: CartConfig,
    transport: T,
    cache: FrameCache,
    frames: Vec<FrameRecord>,
    files: Vec<Option<FileEntry>>,
    /// Cartridge selected by the last successful load.
    loaded: Option<u16>,
    powered_on: bool,
}

impl<T: CartTransport> CartDriver<T> {
    /// Create a powered-off driver.
    pub fn new(config: CartConfig, transport: T) -> CartResult<Self> {
        config.validate()?;
        Ok(Self {
            cache: FrameCache::new(config.cache_frames),
            config,
            transport,
            frames: Vec::new(),
            files: Vec::new(),
            loaded: None,
            powered_on: false,
        })
    }

    pub fn config(&self) -> &CartConfig {
        &self.config
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the driver, returning the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn is_powered_on(&self) -> bool {
        self.powered_on
    }

    /// Start the device: reset the tables, open the cache, then initialize
    /// the media and zero every cartridge.
    pub fn power_on(&mut self) -> CartResult<()> {
        if self.powered_on {
            return Err(CartError::AlreadyPoweredOn);
        }
        self.reset_tables();
        self.cache.set_capacity(self.config.cache_frames)?;
        self.cache.open();

        if let Err(e) = self.initialize_media() {
            self.cache.close();
            return Err(e);
        }
        self.powered_on = true;
        debug!(
            "powered on: {} cartridges x {} frames, cache {} frames",
            self.config.max_cartridges, self.config.frames_per_cartridge, self.config.cache_frames
        );
        Ok(())
    }

    fn initialize_media(&mut self) -> CartResult<()> {
        self.loaded = None;
        self.command(Opcode::InitMedia, 0, 0, None)?;
        for cartridge in 0..self.config.max_cartridges {
            self.load_cartridge(cartridge)?;
            self.command(Opcode::ZeroCartridge, cartridge, 0, None)?;
        }
        Ok(())
    }

    /// Stop the device. Open files are forgotten along with their content.
    pub fn power_off(&mut self) -> CartResult<()> {
        if !self.powered_on {
            return Err(CartError::NotPoweredOn);
        }
        self.cache.close();
        let result = self.command(Opcode::PowerOff, 0, 0, None);

        self.powered_on = false;
        self.loaded = None;
        self.files.clear();
        self.frames.clear();
        debug!("powered off");
        result
    }

    fn reset_tables(&mut self) {
        self.files.clear();
        self.files.resize(self.config.max_files, None);
        self.frames.clear();
        self.frames
            .resize(self.config.total_frames(), FrameRecord::default());
    }

    fn ensure_powered(&self) -> CartResult<()> {
        if self.powered_on {
            Ok(())
        } else {
            Err(CartError::NotPoweredOn)
        }
    }

    /// Open a file by name, creating it if it does not exist.
    ///
    /// Reopening a closed file rewinds its cursor to 0.
    pub fn open(&mut self, name: &str) -> CartResult<FileHandle> {
        self.ensure_powered()?;
        if name.is_empty() {
            return Err(CartError::InvalidName);
        }
        if name.len() > self.config.max_path_length {
            return Err(CartError::NameTooLong(name.to_string()));
        }

        let existing = self
            .files
            .iter_mut()
            .enumerate()
            .find_map(|(i, f)| f.as_mut().filter(|f| f.name == name).map(|f| (i, f)));
        if let Some((idx, entry)) = existing {
            if entry.open {
                return Err(CartError::AlreadyOpen(name.to_string()));
            }
            entry.open = true;
            entry.position = 0;
            debug!("reopened {} as {}", name, idx);
            return Ok(FileHandle(idx as u16));
        }

        let idx = self
            .files
            .iter()
            .position(|f| f.is_none())
            .ok_or(CartError::FileTableFull)?;
        self.files[idx] = Some(FileEntry::new(name));
        debug!("created {} as {}", name, idx);
        Ok(FileHandle(idx as u16))
    }

    /// Close a file. Its content and frame chain are kept.
    pub fn close(&mut self, handle: FileHandle) -> CartResult<()> {
        self.ensure_powered()?;
        let entry = self.open_entry_mut(handle)?;
        entry.open = false;
        debug!("closed {}", handle);
        Ok(())
    }

    /// Move the cursor to `offset` (at most the file length).
    pub fn seek(&mut self, handle: FileHandle, offset: u32) -> CartResult<()> {
        self.ensure_powered()?;
        let entry = self.open_entry_mut(handle)?;
        if offset > entry.length {
            return Err(CartError::SeekOutOfRange {
                offset,
                length: entry.length,
            });
        }
        entry.position = offset;
        Ok(())
    }

    /// Read from the cursor into `buf`.
    ///
    /// Reads past the end of file are clamped; the return value is the
    /// number of bytes actually read.
    pub fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> CartResult<usize> {
        self.ensure_powered()?;
        let entry = self.open_entry(handle)?;
        let count = buf.len().min((entry.length - entry.position) as usize);
        if count == 0 {
            return Ok(0);
        }
        let mut pos = entry.position as usize;
        let mut addr = entry
            .head
            .and_then(|head| self.chain_frame(head, pos / FRAME_SIZE))
            .ok_or(CartError::BrokenChain(handle))?;

        let mut done = 0;
        while done < count {
            let offset = pos % FRAME_SIZE;
            let n = (FRAME_SIZE - offset).min(count - done);
            self.read_span(addr, offset, &mut buf[done..done + n])?;

            done += n;
            pos += n;
            self.open_entry_mut(handle)?.position = pos as u32;

            if done < count {
                addr = self.record(addr).next.ok_or(CartError::BrokenChain(handle))?;
            }
        }
        trace!("read {} bytes from {}", count, handle);
        Ok(count)
    }

    /// Read up to `len` bytes from the cursor into a new vector.
    pub fn read_vec(&mut self, handle: FileHandle, len: usize) -> CartResult<Vec<u8>> {
        let mut buf = vec![0; len];
        let n = self.read(handle, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Write `data` at the cursor, growing the file and its frame chain as
    /// needed. Returns the number of bytes written.
    pub fn write(&mut self, handle: FileHandle, data: &[u8]) -> CartResult<usize> {
        self.ensure_powered()?;
        let (position, head) = {
            let entry = self.open_entry(handle)?;
            (entry.position, entry.head)
        };
        if data.is_empty() {
            return Ok(0);
        }
        let mut pos = position as usize;
        if pos + data.len() > u32::MAX as usize {
            return Err(CartError::MediaFull);
        }

        // `prev` links to `addr` (`None` for the head); `fresh` marks a frame
        // linked by this call that holds none of the file's bytes yet.
        let mut prev = None;
        let (mut addr, mut fresh) = match head {
            Some(head) => (head, false),
            None => {
                let head = self.allocate_frame(handle)?;
                self.open_entry_mut(handle)?.head = Some(head);
                (head, true)
            }
        };
        for _ in 0..pos / FRAME_SIZE {
            prev = Some(addr);
            (addr, fresh) = self.next_or_extend(addr, handle)?;
        }

        let mut done = 0;
        while done < data.len() {
            let offset = pos % FRAME_SIZE;
            let n = (FRAME_SIZE - offset).min(data.len() - done);
            if let Err(e) = self.write_span(addr, offset, &data[done..done + n]) {
                if fresh {
                    self.release_frame(handle, prev, addr);
                }
                return Err(e);
            }

            let record = self.record_mut(addr);
            record.used = record.used.max(offset + n);

            done += n;
            pos += n;
            let entry = self.open_entry_mut(handle)?;
            entry.position = pos as u32;
            entry.length = entry.length.max(entry.position);

            if done < data.len() {
                prev = Some(addr);
                (addr, fresh) = self.next_or_extend(addr, handle)?;
            }
        }
        trace!("wrote {} bytes to {}", data.len(), handle);
        Ok(data.len())
    }

    /// Copy part of one frame out, from the cache when resident.
    fn read_span(&mut self, addr: FrameAddr, offset: usize, out: &mut [u8]) -> CartResult<()> {
        if let Some(cached) = self.cache.lookup(addr) {
            out.copy_from_slice(&cached[offset..offset + out.len()]);
            return Ok(());
        }

        let mut frame = [0u8; FRAME_SIZE];
        self.read_frame(addr, &mut frame)?;
        out.copy_from_slice(&frame[offset..offset + out.len()]);
        if self.config.cache_read_misses {
            self.make_room()?;
            self.cache.insert(addr, &frame);
        }
        Ok(())
    }

    /// Update part of one frame and write the whole frame through.
    fn write_span(&mut self, addr: FrameAddr, offset: usize, src: &[u8]) -> CartResult<()> {
        let mut frame = [0u8; FRAME_SIZE];
        let hit = match self.cache.lookup(addr) {
            Some(cached) => {
                frame = *cached;
                true
            }
            None => false,
        };

        if hit {
            frame[offset..offset + src.len()].copy_from_slice(src);
            self.write_frame(addr, &mut frame)?;
            self.cache.update(addr, &frame);
            return Ok(());
        }

        self.make_room()?;

        // Bytes already in the frame outside the new span must survive.
        let used = self.record(addr).used;
        if used > 0 && !(offset == 0 && src.len() >= used) {
            self.read_frame(addr, &mut frame)?;
        }
        frame[offset..offset + src.len()].copy_from_slice(src);
        self.write_frame(addr, &mut frame)?;
        self.cache.insert(addr, &frame);
        Ok(())
    }

    /// Evict the least recently used frame if the cache is full.
    ///
    /// Evicted frames are dropped: the cache is write-through, so the device
    /// already holds their contents.
    fn make_room(&mut self) -> CartResult<()> {
        if !self.cache.is_full() {
            return Ok(());
        }
        match self.cache.eviction_victim() {
            None => Err(CartError::CacheNoVictim),
            Some(Victim::Vacant(_)) => Ok(()),
            Some(Victim::Occupied(victim)) => {
                self.cache.remove(victim);
                Ok(())
            }
        }
    }

    fn read_frame(&mut self, addr: FrameAddr, frame: &mut FrameBuf) -> CartResult<()> {
        self.load_cartridge(addr.cartridge)?;
        self.command(Opcode::ReadFrame, addr.cartridge, addr.frame, Some(frame))
    }

    fn write_frame(&mut self, addr: FrameAddr, frame: &mut FrameBuf) -> CartResult<()> {
        self.load_cartridge(addr.cartridge)?;
        self.command(Opcode::WriteFrame, addr.cartridge, addr.frame, Some(frame))
    }

    /// Select `cartridge` unless it is already loaded.
    fn load_cartridge(&mut self, cartridge: u16) -> CartResult<()> {
        if self.loaded == Some(cartridge) {
            return Ok(());
        }
        self.loaded = None;
        self.command(Opcode::LoadCartridge, cartridge, 0, None)?;
        self.loaded = Some(cartridge);
        Ok(())
    }

    /// One round trip; a set status bit becomes `DeviceRejected`.
    fn command(
        &mut self,
        op: Opcode,
        cartridge: u16,
        frame: u16,
        buf: Option<&mut FrameBuf>,
    ) -> CartResult<()> {
        let resp = self
            .transport
            .request(CartRegister::command(op, cartridge, frame), buf)?;
        if resp.failed() {
            warn!("device rejected {:?} ({}:{})", op, cartridge, frame);
            return Err(CartError::DeviceRejected {
                opcode: op,
                cartridge,
                frame,
            });
        }
        Ok(())
    }

    /// Claim the first free frame, scanning cartridges then frames in
    /// ascending order.
    fn allocate_frame(&mut self, owner: FileHandle) -> CartResult<FrameAddr> {
        let idx = self
            .frames
            .iter()
            .position(|r| r.owner.is_none())
            .ok_or(CartError::MediaFull)?;
        self.frames[idx] = FrameRecord {
            owner: Some(owner),
            used: 0,
            next: None,
        };
        let addr = self.addr_of(idx);
        debug!("allocated frame {} to {}", addr, owner);
        Ok(addr)
    }

    /// Follow the chain link from `addr`, linking a fresh frame if the chain
    /// ends there. The flag is true when the frame was just linked.
    fn next_or_extend(
        &mut self,
        addr: FrameAddr,
        owner: FileHandle,
    ) -> CartResult<(FrameAddr, bool)> {
        if let Some(next) = self.record(addr).next {
            return Ok((next, false));
        }
        let next = self.allocate_frame(owner)?;
        self.record_mut(addr).next = Some(next);
        Ok((next, true))
    }

    /// Unlink and free `addr`, the last frame of `owner`'s chain, reached
    /// from `prev` or from the head when `prev` is `None`.
    fn release_frame(&mut self, owner: FileHandle, prev: Option<FrameAddr>, addr: FrameAddr) {
        *self.record_mut(addr) = FrameRecord::default();
        match prev {
            Some(prev) => self.record_mut(prev).next = None,
            None => {
                if let Some(entry) = self.files.get_mut(owner.index()).and_then(Option::as_mut) {
                    entry.head = None;
                }
            }
        }
        debug!("released frame {} from {}", addr, owner);
    }

    /// The `index`-th frame of the chain starting at `head`.
    fn chain_frame(&self, head: FrameAddr, index: usize) -> Option<FrameAddr> {
        let mut addr = head;
        for _ in 0..index {
            addr = self.record(addr).next?;
        }
        Some(addr)
    }

    fn slot(&self, addr: FrameAddr) -> usize {
        addr.cartridge as usize * self.config.frames_per_cartridge as usize + addr.frame as usize
    }

    fn addr_of(&self, idx: usize) -> FrameAddr {
        let per = self.config.frames_per_cartridge as usize;
        FrameAddr::new((idx / per) as u16, (idx % per) as u16)
    }

    fn record(&self, addr: FrameAddr) -> &FrameRecord {
        &self.frames[self.slot(addr)]
    }

    fn record_mut(&mut self, addr: FrameAddr) -> &mut FrameRecord {
        let idx = self.slot(addr);
        &mut self.frames[idx]
    }

    fn entry(&self, handle: FileHandle) -> CartResult<&FileEntry> {
        self.files
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or(CartError::InvalidHandle(handle))
    }

    fn open_entry(&self, handle: FileHandle) -> CartResult<&FileEntry> {
        let entry = self.entry(handle)?;
        if !entry.open {
            return Err(CartError::NotOpen(handle));
        }
        Ok(entry)
    }

    fn open_entry_mut(&mut self, handle: FileHandle) -> CartResult<&mut FileEntry> {
        let entry = self
            .files
            .get_mut(handle.index())
            .and_then(Option::as_mut)
            .ok_or(CartError::InvalidHandle(handle))?;
        if !entry.open {
            return Err(CartError::NotOpen(handle));
        }
        Ok(entry)
    }

    /// Handle of the file called `name`, open or not.
    pub fn handle_of(&self, name: &str) -> Option<FileHandle> {
        self.files
            .iter()
            .position(|f| f.as_ref().is_some_and(|f| f.name == name))
            .map(|idx| FileHandle(idx as u16))
    }

    /// File name behind a handle.
    pub fn file_name(&self, handle: FileHandle) -> CartResult<&str> {
        Ok(&self.entry(handle)?.name)
    }

    /// Current file length in bytes.
    pub fn file_length(&self, handle: FileHandle) -> CartResult<u32> {
        Ok(self.entry(handle)?.length)
    }

    /// Current cursor position.
    pub fn file_position(&self, handle: FileHandle) -> CartResult<u32> {
        Ok(self.entry(handle)?.position)
    }

    pub fn is_open(&self, handle: FileHandle) -> CartResult<bool> {
        Ok(self.entry(handle)?.open)
    }

    /// Frames holding a file's content, in byte-offset order.
    pub fn chain(&self, handle: FileHandle) -> CartResult<Vec<FrameAddr>> {
        let mut chain = Vec::new();
        let mut cursor = self.entry(handle)?.head;
        while let Some(addr) = cursor {
            chain.push(addr);
            cursor = self.record(addr).next;
        }
        Ok(chain)
    }

    /// Frames not owned by any file.
    pub fn free_frames(&self) -> usize {
        self.frames.iter().filter(|r| r.owner.is_none()).count()
    }

    /// Names of every file in the table.
    pub fn file_names(&self) -> Vec<String> {
        self.files
            .iter()
            .flatten()
            .map(|f| f.name.clone())
            .collect()
    }
}
