use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use stratus_db::storage::bufferpool::BufferPool;
use stratus_db::storage::disk_manager::DiskManager;
use stratus_db::storage::page::header_page::HeaderPage;
use stratus_db::storage::page::index_page::{IndexPage, IndexPageType};
use stratus_db::storage::page::Page;
use stratus_db::storage::replacement_strategy::ReplacementStrategyType;
use stratus_db::types::{PageId, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE};

pub const LRU_2: ReplacementStrategyType = ReplacementStrategyType::LruK { k: 2 };

/// In-memory disk manager that records every write and deallocation, so
/// tests can assert exactly which pages reached disk and when.
#[derive(Default)]
pub struct MockDiskManager {
    pages: Mutex<HashMap<PageId, [u8; PAGE_SIZE]>>,
    write_log: Mutex<Vec<PageId>>,
    deallocated: Mutex<Vec<PageId>>,
}

impl MockDiskManager {
    pub fn new() -> Self {
        MockDiskManager::default()
    }

    /// Place a page on "disk" without going through the write log
    pub fn seed<P: Page>(&self, page: &P) {
        self.pages.lock().unwrap().insert(page.get_id(), page.serialize());
    }

    pub fn writes(&self) -> Vec<PageId> {
        self.write_log.lock().unwrap().clone()
    }

    pub fn writes_of(&self, page_id: PageId) -> usize {
        self.write_log.lock().unwrap().iter().filter(|&&id| id == page_id).count()
    }

    pub fn deallocated(&self) -> Vec<PageId> {
        self.deallocated.lock().unwrap().clone()
    }
}

impl<P: Page> DiskManager<P> for MockDiskManager {
    fn read_page(&self, id: PageId) -> Option<P> {
        let pages = self.pages.lock().unwrap();
        P::deserialize(pages.get(&id)?)
    }

    fn write_page(&self, page: &P) {
        self.pages.lock().unwrap().insert(page.get_id(), page.serialize());
        self.write_log.lock().unwrap().push(page.get_id());
    }

    fn deallocate_page(&self, id: PageId) {
        self.deallocated.lock().unwrap().push(id);
    }
}

pub fn setup_index_pool(capacity: usize) -> (Arc<BufferPool<IndexPage>>, Arc<MockDiskManager>) {
    let disk = Arc::new(MockDiskManager::new());
    let pool = Arc::new(BufferPool::new(capacity, LRU_2, disk.clone()));
    (pool, disk)
}

/// Pools for a tree over mock storage: an index pool plus a header pool
/// whose record page already exists.
pub fn setup_tree_pools(
    capacity: usize,
) -> (Arc<BufferPool<IndexPage>>, Arc<BufferPool<HeaderPage>>, Arc<MockDiskManager>) {
    let disk = Arc::new(MockDiskManager::new());
    let index_pool = Arc::new(BufferPool::new(capacity, LRU_2, disk.clone()));

    let header_disk = Arc::new(MockDiskManager::new());
    let header_pool = Arc::new(BufferPool::new(1, LRU_2, header_disk));
    let header = header_pool.create_page().expect("create header page");
    assert_eq!(header.id(), HEADER_PAGE_ID);
    drop(header);

    (index_pool, header_pool, disk)
}

/// Levels from the root down to the leaves, following slot-0 children
pub fn tree_height(pool: &Arc<BufferPool<IndexPage>>, root: PageId) -> usize {
    let mut height = 1;
    let mut page_id = root;
    loop {
        let guard = pool.fetch_page(page_id).unwrap();
        let child = {
            let page = guard.read();
            match page.page_type {
                IndexPageType::Leaf => INVALID_PAGE_ID,
                IndexPageType::Internal => page.value_at(0),
            }
        };
        if child == INVALID_PAGE_ID {
            return height;
        }
        height += 1;
        page_id = child;
    }
}

/// Every page id reachable from the root, depth first
pub fn collect_tree_pages(pool: &Arc<BufferPool<IndexPage>>, root: PageId, out: &mut Vec<PageId>) {
    out.push(root);
    let guard = pool.fetch_page(root).unwrap();
    let children: Vec<PageId> = {
        let page = guard.read();
        match page.page_type {
            IndexPageType::Leaf => Vec::new(),
            IndexPageType::Internal => {
                (0..page.size()).map(|i| page.value_at(i)).collect()
            }
        }
    };
    drop(guard);
    for child in children {
        collect_tree_pages(pool, child, out);
    }
}

/// Depth of every leaf under the given page
pub fn leaf_depths(pool: &Arc<BufferPool<IndexPage>>, page_id: PageId, depth: usize, out: &mut Vec<usize>) {
    let guard = pool.fetch_page(page_id).unwrap();
    let children: Vec<PageId> = {
        let page = guard.read();
        match page.page_type {
            IndexPageType::Leaf => {
                out.push(depth);
                Vec::new()
            }
            IndexPageType::Internal => {
                (0..page.size()).map(|i| page.value_at(i)).collect()
            }
        }
    };
    drop(guard);
    for child in children {
        leaf_depths(pool, child, depth + 1, out);
    }
}

/// Check that every separator equals the smallest key of its right
/// subtree; returns the subtree's smallest key
pub fn check_separators(pool: &Arc<BufferPool<IndexPage>>, page_id: PageId) -> i64 {
    let guard = pool.fetch_page(page_id).unwrap();
    let (children, keys): (Vec<PageId>, Vec<i64>) = {
        let page = guard.read();
        match page.page_type {
            IndexPageType::Leaf => {
                return page.key_at(0);
            }
            IndexPageType::Internal => (
                (0..page.size()).map(|i| page.value_at(i)).collect(),
                (0..page.size()).map(|i| page.key_at(i)).collect(),
            ),
        }
    };
    drop(guard);

    let mut subtree_min = 0;
    for (i, child) in children.iter().enumerate() {
        let child_min = check_separators(pool, *child);
        if i == 0 {
            subtree_min = child_min;
        } else {
            assert_eq!(keys[i], child_min, "separator must equal the min of its right subtree");
        }
    }
    subtree_min
}
