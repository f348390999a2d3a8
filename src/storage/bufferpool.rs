use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::storage::disk_manager::DiskManager;
use crate::storage::extendible_hash::ExtendibleHashTable;
use crate::storage::page::{Page, PageError};
use crate::storage::replacement_strategy::{
    replacement_strategy_factory, ReplacementStrategy, ReplacementStrategyType,
};
use crate::types::{FrameId, PageId, INVALID_PAGE_ID};

const PAGE_TABLE_BUCKET_SIZE: usize = 8;

#[derive(Debug)]
pub struct BufferFrame<P: Page> {
    page: RwLock<P>,
    pin_count: AtomicUsize,  // number of clients using the page
    is_dirty: AtomicBool,    // if the page is modified since last write
}

struct PoolState {
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// Fixed pool of in-memory frames caching disk pages. Page residency is
/// tracked through an extendible-hash page table; victims come from the
/// configured replacement strategy. One pool mutex is held for the whole
/// of every public call, disk I/O included.
pub struct BufferPool<P: Page> {
    frames: Vec<Arc<BufferFrame<P>>>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    strategy: Box<dyn ReplacementStrategy>,
    disk: Arc<dyn DiskManager<P>>,
    state: Mutex<PoolState>,
}

/// Scoped ownership of one pin on one page. `write` access marks the
/// guard dirty; dropping the guard is the one unpin path, so every fetch
/// is balanced on every control-flow path.
pub struct PageGuard<P: Page + 'static> {
    pool: Arc<BufferPool<P>>,
    frame: Arc<BufferFrame<P>>,
    page_id: PageId,
    dirty: bool,
}

impl<P: Page> PageGuard<P> {
    #[inline]
    pub fn id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, P> {
        self.frame.page.read().unwrap()
    }

    pub fn write(&mut self) -> RwLockWriteGuard<'_, P> {
        self.dirty = true;
        self.frame.page.write().unwrap()
    }
}

impl<P: Page + 'static> Drop for PageGuard<P> {
    fn drop(&mut self) {
        let _ = self.pool.unpin_page(self.page_id, self.dirty);
    }
}

impl<P: Page + 'static> BufferPool<P> {
    pub fn new(
        pool_size: usize,
        strategy_type: ReplacementStrategyType,
        disk: Arc<dyn DiskManager<P>>,
    ) -> Self {
        Self::new_with_first_page(pool_size, strategy_type, disk, 0)
    }

    /// Pool over existing storage: page allocation continues from the
    /// given id instead of 0
    pub fn new_with_first_page(
        pool_size: usize,
        strategy_type: ReplacementStrategyType,
        disk: Arc<dyn DiskManager<P>>,
        first_page_id: PageId,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(Arc::new(BufferFrame {
                page: RwLock::new(P::new(INVALID_PAGE_ID)),
                pin_count: AtomicUsize::new(0),
                is_dirty: AtomicBool::new(false),
            }));
            free_list.push_back(i);
        }

        BufferPool {
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            strategy: replacement_strategy_factory(strategy_type, pool_size),
            disk,
            state: Mutex::new(PoolState { free_list, next_page_id: first_page_id }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Number of pages currently resident
    pub fn current_size(&self) -> usize {
        self.page_table.len()
    }

    /// Outstanding pins on a resident page
    pub fn pin_count(&self, page_id: PageId) -> Option<usize> {
        let frame_id = self.page_table.find(&page_id)?;
        Some(self.frames[frame_id].pin_count.load(Ordering::SeqCst))
    }

    /// Allocate a brand-new page in a frame, pinning it. The page is born
    /// dirty so it reaches disk even if the caller never writes it.
    pub fn create_page(self: &Arc<Self>) -> Result<PageGuard<P>, PageError> {
        let mut state = self.state.lock().unwrap();

        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = state.next_page_id;
        state.next_page_id += 1;

        let frame = &self.frames[frame_id];
        *frame.page.write().unwrap() = P::new(page_id);
        frame.pin_count.store(1, Ordering::SeqCst);
        frame.is_dirty.store(true, Ordering::SeqCst);

        self.page_table.insert(page_id, frame_id);
        self.strategy.record_access(frame_id);
        self.strategy.set_evictable(frame_id, false);

        Ok(self.make_guard(frame_id, page_id))
    }

    /// Fetch a page into memory, pinning it. Evicts a page if the pool is
    /// full; fails with `PoolExhausted` when every frame is pinned.
    pub fn fetch_page(self: &Arc<Self>, page_id: PageId) -> Result<PageGuard<P>, PageError> {
        let mut state = self.state.lock().unwrap();

        // page is already in memory
        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id];
            frame.pin_count.fetch_add(1, Ordering::SeqCst);
            self.strategy.record_access(frame_id);
            self.strategy.set_evictable(frame_id, false);
            return Ok(self.make_guard(frame_id, page_id));
        }

        // fetch page from disk before committing a frame to it
        let page = self.disk.read_page(page_id).ok_or(PageError::InvalidPage)?;

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.frames[frame_id];
        *frame.page.write().unwrap() = page;
        frame.pin_count.store(1, Ordering::SeqCst);
        frame.is_dirty.store(false, Ordering::SeqCst);

        self.page_table.insert(page_id, frame_id);
        self.strategy.record_access(frame_id);
        self.strategy.set_evictable(frame_id, false);

        Ok(self.make_guard(frame_id, page_id))
    }

    /// Remove one client from the page, optionally marking it dirty. The
    /// dirty flag is sticky: unpinning clean never clears it. A page whose
    /// pin count reaches zero becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), PageError> {
        let _state = self.state.lock().unwrap();

        let frame_id = self.page_table.find(&page_id).ok_or(PageError::InvalidPage)?;
        let frame = &self.frames[frame_id];

        if frame.pin_count.load(Ordering::SeqCst) == 0 {
            return Err(PageError::PageAlreadyUnpinned);
        }
        if is_dirty {
            frame.is_dirty.store(true, Ordering::SeqCst);
        }

        let prev = frame.pin_count.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.strategy.set_evictable(frame_id, true);
        }
        Ok(())
    }

    /// Write a resident page to disk and clear its dirty flag. Pin state
    /// is untouched.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), PageError> {
        let _state = self.state.lock().unwrap();
        self.flush_resident(page_id)
    }

    /// Flush every resident page
    pub fn flush_all(&self) {
        let _state = self.state.lock().unwrap();
        for frame in &self.frames {
            let page_id = frame.page.read().unwrap().get_id();
            if page_id != INVALID_PAGE_ID {
                let _ = self.flush_resident(page_id);
            }
        }
    }

    /// Drop a page from the pool and hand its id back to the disk manager.
    /// Deleting a page that is not resident succeeds; deleting a pinned
    /// page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), PageError> {
        let mut state = self.state.lock().unwrap();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(());
        };
        let frame = &self.frames[frame_id];
        if frame.pin_count.load(Ordering::SeqCst) > 0 {
            return Err(PageError::PagePinned);
        }

        self.strategy.remove(frame_id);
        *frame.page.write().unwrap() = P::new(INVALID_PAGE_ID);
        frame.pin_count.store(0, Ordering::SeqCst);
        frame.is_dirty.store(false, Ordering::SeqCst);

        self.page_table.remove(&page_id);
        state.free_list.push_back(frame_id);
        self.disk.deallocate_page(page_id);
        debug!(page_id, "page deleted from pool");
        Ok(())
    }

    /// Pick a frame for a new resident: the free list first, then a
    /// replacer victim whose old page is written back if dirty.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId, PageError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.strategy.evict() else {
            return Err(PageError::PoolExhausted);
        };

        let frame = &self.frames[frame_id];
        let old_page_id = frame.page.read().unwrap().get_id();
        if frame.is_dirty.swap(false, Ordering::SeqCst) {
            debug!(page_id = old_page_id, "writing back dirty page on eviction");
            self.disk.write_page(&*frame.page.read().unwrap());
        }

        self.page_table.remove(&old_page_id);
        *frame.page.write().unwrap() = P::new(INVALID_PAGE_ID);
        frame.pin_count.store(0, Ordering::SeqCst);
        Ok(frame_id)
    }

    fn flush_resident(&self, page_id: PageId) -> Result<(), PageError> {
        if page_id == INVALID_PAGE_ID {
            return Err(PageError::InvalidPage);
        }
        let frame_id = self.page_table.find(&page_id).ok_or(PageError::InvalidPage)?;
        let frame = &self.frames[frame_id];

        self.disk.write_page(&*frame.page.read().unwrap());
        frame.is_dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn make_guard(self: &Arc<Self>, frame_id: FrameId, page_id: PageId) -> PageGuard<P> {
        PageGuard {
            pool: Arc::clone(self),
            frame: Arc::clone(&self.frames[frame_id]),
            page_id,
            dirty: false,
        }
    }
}
