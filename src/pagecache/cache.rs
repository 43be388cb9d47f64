//! The slot cache
//!
//! A fixed array of slots, each a latched frame plus a pin count, and a
//! directory mapping `(file, page)` to a slot. The directory lock is held
//! only to look up, pin or claim a slot; all I/O happens under the slot
//! latch with the directory unlocked.
//!
//! Rules that keep this deadlock free:
//! - pins are only ever taken with the directory locked;
//! - nobody blocks on a slot latch while holding the directory lock
//!   (eviction uses `try_write`);
//! - a slot latch may be held while taking the directory lock.
//!
//! A thread that pinned a slot and then waited for its latch re-checks the
//! frame's key before using it, because a failed load or a release may
//! have repurposed the slot in between.

use std::collections::{BTreeSet, HashMap};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::errors::{PageCacheError, PageCacheResult};
use super::store::BlockStore;
use super::{FileId, FlushGuard, FlushMode};
use crate::crash_point::{maybe_crash, points};
use crate::hooks::{SharedPipeline, TransformContext};
use crate::lsn::Lsn;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::page::{is_blank, page_lsn, set_page_lsn, PageNo};

type PageKey = (FileId, PageNo);

#[derive(Debug)]
struct FileBinding {
    name: String,
    store: Arc<dyn BlockStore>,
    pipeline: SharedPipeline,
    block_size: usize,
}

#[derive(Debug, Default)]
struct Frame {
    key: Option<PageKey>,
    valid: bool,
    dirty: bool,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct Slot {
    latch: RwLock<Frame>,
    pins: AtomicUsize,
}

#[derive(Debug, Default)]
struct Directory {
    map: HashMap<PageKey, usize>,
    last_use: Vec<u64>,
    clock: u64,
    files: HashMap<FileId, Arc<FileBinding>>,
    next_file: u32,
    /// rec_lsn of every dirty page; `IMPOSSIBLE` for unlogged changes
    dirty: HashMap<PageKey, Lsn>,
}

impl Directory {
    fn touch(&mut self, slot: usize) {
        self.clock += 1;
        self.last_use[slot] = self.clock;
    }
}

/// A dirty page and the LSN of the first change since it was last written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyPage {
    pub file: FileId,
    pub page: PageNo,
    pub rec_lsn: Lsn,
}

/// Releases a pin once the latch guard declared before it is gone
struct PinToken<'a> {
    slot: &'a Slot,
}

impl Drop for PinToken<'_> {
    fn drop(&mut self) {
        self.slot.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Shared access to a cached page
pub struct PageReadGuard<'a> {
    frame: RwLockReadGuard<'a, Frame>,
    _pin: PinToken<'a>,
    page: PageNo,
}

impl PageReadGuard<'_> {
    pub fn page_no(&self) -> PageNo {
        self.page
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.frame.data
    }
}

/// Exclusive access to a cached page
pub struct PageWriteGuard<'a> {
    frame: RwLockWriteGuard<'a, Frame>,
    _pin: PinToken<'a>,
    cache: &'a PageCache,
    key: PageKey,
}

impl PageWriteGuard<'_> {
    pub fn page_no(&self) -> PageNo {
        self.key.1
    }

    pub fn file(&self) -> FileId {
        self.key.0
    }

    /// Record a change made through this guard.
    ///
    /// A logged change passes its record's LSN, which is stamped into the
    /// page; `Lsn::IMPOSSIBLE` marks an unlogged change and leaves the page
    /// LSN alone.
    pub fn mark_dirty(&mut self, lsn: Lsn) {
        if !lsn.is_impossible() {
            set_page_lsn(&mut self.frame.data, lsn);
        }
        self.frame.dirty = true;
        let mut dir = self.cache.dir.lock();
        let rec = dir.dirty.entry(self.key).or_insert(lsn);
        if rec.is_impossible() {
            *rec = lsn;
        }
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.frame.data
    }
}

impl DerefMut for PageWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.frame.data
    }
}

enum Step<'a> {
    Load(usize, RwLockWriteGuard<'a, Frame>, Arc<FileBinding>),
    FlushVictim(usize, RwLockWriteGuard<'a, Frame>),
    Retry,
}

enum Located<'a> {
    Hit(usize),
    Loaded(usize, RwLockWriteGuard<'a, Frame>),
}

pub struct PageCache {
    slots: Box<[Slot]>,
    dir: Mutex<Directory>,
    flush_guard: Option<Arc<dyn FlushGuard>>,
    metrics: Arc<MetricsRegistry>,
}

impl PageCache {
    /// A cache of `capacity` slots. Pages carrying an LSN are written only
    /// once `flush_guard` reports the log durable up to that LSN.
    pub fn new(
        capacity: usize,
        flush_guard: Option<Arc<dyn FlushGuard>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let slots: Vec<Slot> = (0..capacity.max(1)).map(|_| Slot::default()).collect();
        let dir = Directory {
            last_use: vec![0; slots.len()],
            next_file: 1,
            ..Directory::default()
        };
        Self {
            slots: slots.into_boxed_slice(),
            dir: Mutex::new(dir),
            flush_guard,
            metrics,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Attach a block store; every page of the file passes through
    /// `pipeline` on its way to and from the store
    pub fn register_file(
        &self,
        name: impl Into<String>,
        store: Arc<dyn BlockStore>,
        pipeline: SharedPipeline,
        block_size: usize,
    ) -> PageCacheResult<FileId> {
        match store.fixed_block_size() {
            Some(_) if pipeline.is_variable_length() => {
                return Err(PageCacheError::incompatible_store(
                    "compressed pages need a store without a fixed block size",
                ))
            }
            Some(fixed) if fixed != block_size => {
                return Err(PageCacheError::incompatible_store(format!(
                    "store block size {} differs from page size {}",
                    fixed, block_size
                )))
            }
            _ => {}
        }
        let mut dir = self.dir.lock();
        let id = FileId(dir.next_file);
        dir.next_file += 1;
        dir.files.insert(
            id,
            Arc::new(FileBinding {
                name: name.into(),
                store,
                pipeline,
                block_size,
            }),
        );
        Ok(id)
    }

    /// Forget a file, dropping its cached pages without writing them
    pub fn unregister_file(&self, file: FileId) {
        let _ = self.flush_file(file, FlushMode::IgnoreChanged);
        self.dir.lock().files.remove(&file);
    }

    fn binding(&self, file: FileId) -> PageCacheResult<Arc<FileBinding>> {
        self.dir
            .lock()
            .files
            .get(&file)
            .cloned()
            .ok_or_else(|| PageCacheError::unknown_file(file))
    }

    pub fn block_size(&self, file: FileId) -> PageCacheResult<usize> {
        Ok(self.binding(file)?.block_size)
    }

    /// Blocks the file's store holds, ignoring pages only in the cache
    pub fn stored_block_count(&self, file: FileId) -> PageCacheResult<u32> {
        let binding = self.binding(file)?;
        binding
            .store
            .block_count()
            .map_err(|e| PageCacheError::io(file, 0, "cannot size store", e))
    }

    pub fn read(&self, file: FileId, page: PageNo) -> PageCacheResult<PageReadGuard<'_>> {
        let key = (file, page);
        loop {
            let (idx, frame) = match self.locate(key)? {
                Located::Loaded(idx, frame) => (idx, RwLockWriteGuard::downgrade(frame)),
                Located::Hit(idx) => {
                    let frame = self.slots[idx].latch.read();
                    if frame.key != Some(key) || !frame.valid {
                        drop(frame);
                        self.unpin(idx);
                        continue;
                    }
                    self.metrics.increment_cache_hits();
                    (idx, frame)
                }
            };
            return Ok(PageReadGuard {
                frame,
                _pin: PinToken {
                    slot: &self.slots[idx],
                },
                page,
            });
        }
    }

    pub fn write(&self, file: FileId, page: PageNo) -> PageCacheResult<PageWriteGuard<'_>> {
        let key = (file, page);
        loop {
            let (idx, frame) = match self.locate(key)? {
                Located::Loaded(idx, frame) => (idx, frame),
                Located::Hit(idx) => {
                    let frame = self.slots[idx].latch.write();
                    if frame.key != Some(key) || !frame.valid {
                        drop(frame);
                        self.unpin(idx);
                        continue;
                    }
                    self.metrics.increment_cache_hits();
                    (idx, frame)
                }
            };
            return Ok(PageWriteGuard {
                frame,
                _pin: PinToken {
                    slot: &self.slots[idx],
                },
                cache: self,
                key,
            });
        }
    }

    fn unpin(&self, slot: usize) {
        self.slots[slot].pins.fetch_sub(1, Ordering::AcqRel);
    }

    /// Unpinned slot to reuse: a free one first, else the least recently
    /// used. Called with the directory locked.
    fn pick_victim(&self, dir: &Directory) -> Option<usize> {
        let mut best: Option<(bool, u64, usize)> = None;
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot.pins.load(Ordering::Acquire) != 0 {
                continue;
            }
            let occupied = dir.last_use[idx] != 0;
            let candidate = (occupied, dir.last_use[idx], idx);
            if best.map_or(true, |b| candidate < b) {
                best = Some(candidate);
            }
        }
        best.map(|(_, _, idx)| idx)
    }

    /// Pin the slot holding `key`. On a miss the page is loaded into a
    /// claimed slot and returned still write-latched; on a hit the caller
    /// latches and re-checks the frame itself.
    fn locate(&self, key: PageKey) -> PageCacheResult<Located<'_>> {
        loop {
            let step = {
                let mut dir = self.dir.lock();
                let binding = dir
                    .files
                    .get(&key.0)
                    .cloned()
                    .ok_or_else(|| PageCacheError::unknown_file(key.0))?;
                if let Some(&idx) = dir.map.get(&key) {
                    self.slots[idx].pins.fetch_add(1, Ordering::AcqRel);
                    dir.touch(idx);
                    return Ok(Located::Hit(idx));
                }
                let idx = self
                    .pick_victim(&dir)
                    .ok_or_else(|| PageCacheError::cache_full(self.slots.len()))?;
                let slot = &self.slots[idx];
                match slot.latch.try_write() {
                    None => Step::Retry,
                    Some(frame) if frame.dirty => {
                        slot.pins.fetch_add(1, Ordering::AcqRel);
                        Step::FlushVictim(idx, frame)
                    }
                    Some(mut frame) => {
                        slot.pins.fetch_add(1, Ordering::AcqRel);
                        if let Some(old) = frame.key.take() {
                            dir.map.remove(&old);
                            self.metrics.increment_page_evictions();
                        }
                        frame.key = Some(key);
                        frame.valid = false;
                        dir.map.insert(key, idx);
                        dir.touch(idx);
                        Step::Load(idx, frame, binding)
                    }
                }
            };

            match step {
                Step::Retry => std::thread::yield_now(),
                Step::FlushVictim(idx, mut frame) => {
                    let result = self.write_out(&mut frame);
                    drop(frame);
                    self.unpin(idx);
                    result?;
                }
                Step::Load(idx, mut frame, binding) => {
                    self.metrics.increment_cache_misses();
                    match self.load(key, &binding) {
                        Ok(data) => {
                            frame.data = data;
                            frame.valid = true;
                            frame.dirty = false;
                            return Ok(Located::Loaded(idx, frame));
                        }
                        Err(err) => {
                            frame.key = None;
                            frame.valid = false;
                            {
                                let mut dir = self.dir.lock();
                                if dir.map.get(&key) == Some(&idx) {
                                    dir.map.remove(&key);
                                }
                                dir.last_use[idx] = 0;
                            }
                            drop(frame);
                            self.unpin(idx);
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    fn load(&self, key: PageKey, binding: &FileBinding) -> PageCacheResult<Vec<u8>> {
        let (file, page) = key;
        let stored = binding.store.read_block(page).map_err(|e| {
            log_event_with_fields(
                Event::PageIoError,
                &[("file", &binding.name), ("page", &page.to_string())],
            );
            PageCacheError::io(file, page, "block read failed", e)
        })?;
        self.metrics.increment_page_reads();
        let stored = match stored {
            Some(block) if !is_blank(&block) => block,
            _ => return Ok(vec![0u8; binding.block_size]),
        };
        let ctx = TransformContext {
            page_no: page,
            block_size: binding.block_size,
        };
        binding.pipeline.decode(&ctx, stored).map_err(|e| {
            let err = PageCacheError::from_hook(file, page, e);
            log_event_with_fields(
                Event::PageCorrupt,
                &[
                    ("code", err.code().code()),
                    ("file", &binding.name),
                    ("page", &page.to_string()),
                    ("reason", err.message()),
                ],
            );
            err
        })
    }

    /// Write a dirty frame through its file's pipeline. The caller holds
    /// the frame's write latch.
    fn write_out(&self, frame: &mut Frame) -> PageCacheResult<()> {
        let key = match frame.key {
            Some(key) if frame.valid && frame.dirty => key,
            _ => return Ok(()),
        };
        let (file, page) = key;
        let binding = self.binding(file)?;
        if binding.store.is_read_only() {
            return Err(PageCacheError::read_only(file, page));
        }

        let lsn = page_lsn(&frame.data);
        if !lsn.is_impossible() {
            if let Some(guard) = &self.flush_guard {
                guard
                    .ensure_durable(lsn)
                    .map_err(|reason| PageCacheError::log_flush_failed(file, page, reason))?;
            }
        }

        maybe_crash(points::PAGE_BEFORE_WRITE);
        let ctx = TransformContext {
            page_no: page,
            block_size: binding.block_size,
        };
        let stored = binding
            .pipeline
            .encode(&ctx, &frame.data)
            .map_err(|e| PageCacheError::from_hook(file, page, e))?;
        if let Some(fixed) = binding.store.fixed_block_size() {
            if stored.len() != fixed {
                return Err(PageCacheError::bad_block(
                    file,
                    page,
                    format!("encoded block is {} bytes, store takes {}", stored.len(), fixed),
                ));
            }
        }
        binding.store.write_block(page, &stored).map_err(|e| {
            log_event_with_fields(
                Event::PageIoError,
                &[("file", &binding.name), ("page", &page.to_string())],
            );
            PageCacheError::io(file, page, "block write failed", e)
        })?;
        maybe_crash(points::PAGE_AFTER_WRITE);
        self.metrics.increment_page_writes();

        frame.dirty = false;
        self.dir.lock().dirty.remove(&key);
        Ok(())
    }

    /// Pin every cached page matching `filter`, in page order
    fn pin_matching(&self, filter: impl Fn(&PageKey, &Directory) -> bool) -> Vec<(usize, PageKey)> {
        let dir = self.dir.lock();
        let mut targets: Vec<(usize, PageKey)> = dir
            .map
            .iter()
            .filter(|(key, _)| filter(key, &dir))
            .map(|(key, &idx)| (idx, *key))
            .collect();
        for (idx, _) in &targets {
            self.slots[*idx].pins.fetch_add(1, Ordering::AcqRel);
        }
        targets.sort_by_key(|(_, key)| *key);
        targets
    }

    /// Drop a frame from the cache. Caller holds its write latch.
    fn release_frame(&self, idx: usize, frame: &mut Frame) {
        if let Some(key) = frame.key.take() {
            let mut dir = self.dir.lock();
            if dir.map.get(&key) == Some(&idx) {
                dir.map.remove(&key);
            }
            dir.dirty.remove(&key);
            dir.last_use[idx] = 0;
        }
        frame.valid = false;
        frame.dirty = false;
    }

    /// Write or drop every cached page of `file`.
    ///
    /// `Keep` writes dirty pages and keeps them cached; `Release` writes
    /// and evicts; `IgnoreChanged` evicts without writing. The store is
    /// synced unless changes are ignored. The first write error is
    /// returned after every page was attempted; a page that failed to
    /// write stays cached and dirty.
    pub fn flush_file(&self, file: FileId, mode: FlushMode) -> PageCacheResult<()> {
        let targets = self.pin_matching(|key, _| key.0 == file);
        let mut first_err = None;
        for (idx, key) in targets {
            let mut frame = self.slots[idx].latch.write();
            if frame.key == Some(key) && frame.valid {
                let written = match mode {
                    FlushMode::IgnoreChanged => true,
                    FlushMode::Keep | FlushMode::Release => match self.write_out(&mut frame) {
                        Ok(()) => true,
                        Err(e) => {
                            first_err.get_or_insert(e);
                            false
                        }
                    },
                };
                if written && mode != FlushMode::Keep {
                    self.release_frame(idx, &mut frame);
                }
            }
            drop(frame);
            self.unpin(idx);
        }
        if let Some(err) = first_err {
            return Err(err);
        }
        if mode != FlushMode::IgnoreChanged {
            let binding = self.binding(file)?;
            if !binding.store.is_read_only() {
                binding
                    .store
                    .sync()
                    .map_err(|e| PageCacheError::sync_failed(file, e))?;
            }
        }
        Ok(())
    }

    /// Write every dirty page whose rec_lsn is below `bound`, keeping them
    /// cached; returns how many pages were written
    pub fn flush_older_than(&self, bound: Lsn) -> PageCacheResult<usize> {
        self.flush_dirty(|rec| rec < bound)
    }

    /// Write every dirty page
    pub fn flush_all(&self) -> PageCacheResult<usize> {
        self.flush_dirty(|_| true)
    }

    fn flush_dirty(&self, pick: impl Fn(Lsn) -> bool) -> PageCacheResult<usize> {
        let targets =
            self.pin_matching(|key, dir| dir.dirty.get(key).map_or(false, |rec| pick(*rec)));
        let mut written = 0;
        let mut files = BTreeSet::new();
        let mut first_err = None;
        for (idx, key) in targets {
            let mut frame = self.slots[idx].latch.write();
            if frame.key == Some(key) && frame.dirty {
                match self.write_out(&mut frame) {
                    Ok(()) => {
                        written += 1;
                        files.insert(key.0);
                    }
                    Err(e) => {
                        first_err.get_or_insert(e);
                    }
                }
            }
            drop(frame);
            self.unpin(idx);
        }
        if let Some(err) = first_err {
            return Err(err);
        }
        for file in files {
            let binding = self.binding(file)?;
            binding
                .store
                .sync()
                .map_err(|e| PageCacheError::sync_failed(file, e))?;
        }
        Ok(written)
    }

    /// Drop cached pages of `file` from `first` on and cut the store to
    /// `first` blocks
    pub fn truncate_file(&self, file: FileId, first: PageNo) -> PageCacheResult<()> {
        let targets = self.pin_matching(|key, _| key.0 == file && key.1 >= first);
        for (idx, key) in targets {
            let mut frame = self.slots[idx].latch.write();
            if frame.key == Some(key) {
                self.release_frame(idx, &mut frame);
            }
            drop(frame);
            self.unpin(idx);
        }
        let binding = self.binding(file)?;
        binding
            .store
            .truncate(first)
            .map_err(|e| PageCacheError::io(file, first, "truncate failed", e))
    }

    /// Every dirty page with its rec_lsn
    pub fn dirty_pages(&self) -> Vec<DirtyPage> {
        let dir = self.dir.lock();
        let mut pages: Vec<DirtyPage> = dir
            .dirty
            .iter()
            .map(|(&(file, page), &rec_lsn)| DirtyPage {
                file,
                page,
                rec_lsn,
            })
            .collect();
        pages.sort_by_key(|p| (p.file, p.page));
        pages
    }

    pub fn cached_pages(&self) -> usize {
        self.dir.lock().map.len()
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dir = self.dir.lock();
        f.debug_struct("PageCache")
            .field("capacity", &self.slots.len())
            .field("cached", &dir.map.len())
            .field("dirty", &dir.dirty.len())
            .field("files", &dir.files.len())
            .finish()
    }
}
