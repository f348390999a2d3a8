use std::sync::Arc;
use tracing::debug;

use crate::storage::bufferpool::{BufferPool, PageGuard};
use crate::storage::page::header_page::HeaderPage;
use crate::storage::page::index_page::{
    get_internal_capacity, get_leaf_capacity, IndexPage, IndexPageType, RecordId,
};
use crate::storage::transaction::Transaction;
use crate::types::{PageId, HEADER_PAGE_ID, INVALID_PAGE_ID};

/// B+ tree index over buffer-pool pages, keyed by i64 with record-id
/// values. The root page id is persisted in the header page under the
/// index name on every root change.
///
/// Mutating operations take `&mut self`, so a tree instance is safe for
/// one writer interleaved with readers; concurrent writers need an
/// external tree per writer epoch or outer serialization.
pub struct BPlusTree {
    index_name: String,
    root_page_id: PageId,
    buffer_pool: Arc<BufferPool<IndexPage>>,
    header_pool: Arc<BufferPool<HeaderPage>>,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl BPlusTree {
    pub fn new(
        index_name: &str,
        buffer_pool: Arc<BufferPool<IndexPage>>,
        header_pool: Arc<BufferPool<HeaderPage>>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        debug_assert!(leaf_max_size > 1);
        debug_assert!(leaf_max_size <= get_leaf_capacity());
        debug_assert!(internal_max_size > 2);
        debug_assert!(internal_max_size <= get_internal_capacity());

        // reload a persisted root if this index already exists
        let root_page_id = {
            let header_guard = header_pool
                .fetch_page(HEADER_PAGE_ID)
                .expect("fetch header page failed");
            let root = header_guard.read().get_record(index_name);
            root.unwrap_or(INVALID_PAGE_ID)
        };

        BPlusTree {
            index_name: index_name.to_string(),
            root_page_id,
            buffer_pool,
            header_pool,
            leaf_max_size,
            internal_max_size,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root_page_id == INVALID_PAGE_ID
    }

    #[inline]
    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    /// Point lookup: the record id stored under the key, if any
    pub fn get_value(&self, key: i64) -> Option<RecordId> {
        if self.is_empty() {
            return None;
        }
        let leaf_guard = self.find_leaf(key);
        let rid = leaf_guard.read().search_rid(key);
        rid
    }

    /// Insert a key and record id. Duplicate keys are rejected: the tree
    /// is left untouched and false is returned.
    pub fn insert(&mut self, key: i64, rid: RecordId) -> bool {
        if self.is_empty() {
            self.start_new_tree(key, rid);
            return true;
        }
        self.insert_into_leaf(key, rid)
    }

    /// Delete the entry under the key, rebalancing underflowing pages.
    /// Missing keys return quietly. Pages emptied along the way are
    /// collected in the transaction and freed before returning.
    pub fn remove(&mut self, key: i64, txn: &mut Transaction) {
        if self.is_empty() {
            return;
        }

        let mut leaf_guard = self.find_leaf(key);
        if leaf_guard.read().search_rid(key).is_none() {
            return;
        }
        leaf_guard.write().remove_record(key);

        self.rebalance_leaf(leaf_guard, txn);

        for page_id in txn.take_deleted_pages() {
            self.buffer_pool.delete_page(page_id).expect("delete page failed");
        }
    }

    /// Iterator positioned on the smallest key
    pub fn begin(&self) -> TreeIterator {
        if self.is_empty() {
            return TreeIterator::empty(Arc::clone(&self.buffer_pool));
        }

        // descend along the leftmost children
        let mut guard = self.buffer_pool
            .fetch_page(self.root_page_id)
            .expect("fetch root page failed");
        loop {
            let child_id = {
                let page = guard.read();
                match page.page_type {
                    IndexPageType::Leaf => None,
                    IndexPageType::Internal => Some(page.value_at(0)),
                }
            };
            match child_id {
                Some(id) => {
                    guard = self.buffer_pool.fetch_page(id).expect("fetch child page failed");
                }
                None => break,
            }
        }
        TreeIterator::at(Arc::clone(&self.buffer_pool), guard, 0)
    }

    /// Iterator positioned on the first key not less than the given key
    pub fn begin_at(&self, key: i64) -> TreeIterator {
        if self.is_empty() {
            return TreeIterator::empty(Arc::clone(&self.buffer_pool));
        }
        let guard = self.find_leaf(key);
        let index = guard.read().key_position(key);
        TreeIterator::at(Arc::clone(&self.buffer_pool), guard, index)
    }

    /// Descend from the root to the leaf covering the key. Each step pins
    /// the child before the parent guard drops its pin.
    fn find_leaf(&self, key: i64) -> PageGuard<IndexPage> {
        let mut guard = self.buffer_pool
            .fetch_page(self.root_page_id)
            .expect("fetch root page failed");
        loop {
            let child_id = {
                let page = guard.read();
                match page.page_type {
                    IndexPageType::Leaf => None,
                    IndexPageType::Internal => Some(page.search_child(key)),
                }
            };
            match child_id {
                Some(id) => {
                    guard = self.buffer_pool.fetch_page(id).expect("fetch child page failed");
                }
                None => return guard,
            }
        }
    }

    fn start_new_tree(&mut self, key: i64, rid: RecordId) {
        let mut root_guard = self.buffer_pool
            .create_page()
            .expect("allocate tree root failed");
        let root_id = root_guard.id();
        {
            let mut page = root_guard.write();
            *page = IndexPage::new_leaf(root_id, INVALID_PAGE_ID, self.leaf_max_size);
            page.insert_record(key, rid);
        }
        self.root_page_id = root_id;
        self.update_root_page_id(true);
    }

    fn insert_into_leaf(&mut self, key: i64, rid: RecordId) -> bool {
        let mut leaf_guard = self.find_leaf(key);

        // reject duplicates without dirtying the leaf
        if leaf_guard.read().search_rid(key).is_some() {
            return false;
        }

        let new_size = {
            let mut page = leaf_guard.write();
            page.insert_record(key, rid);
            page.size()
        };
        if new_size < self.leaf_max_size {
            return true;
        }

        // the leaf became full: split off its upper half
        let mut sibling_guard = self.buffer_pool
            .create_page()
            .expect("allocate leaf page failed when splitting");
        let sibling_id = sibling_guard.id();
        let risen_key = {
            let mut page = leaf_guard.write();
            let sibling = page.split_leaf(sibling_id);
            let risen = sibling.key_at(0);
            *sibling_guard.write() = sibling;
            risen
        };

        self.insert_risen_key_to_parent(risen_key, &mut leaf_guard, &mut sibling_guard);
        true
    }

    /// Register a freshly split-off page with the parent of the page it
    /// came from, growing a new root or splitting the parent as needed.
    fn insert_risen_key_to_parent(
        &mut self,
        risen_key: i64,
        left: &mut PageGuard<IndexPage>,
        right: &mut PageGuard<IndexPage>,
    ) {
        let parent_id = left.read().get_parent();

        // the split page was the root: grow a new root above both halves
        if parent_id == INVALID_PAGE_ID {
            let mut root_guard = self.buffer_pool
                .create_page()
                .expect("allocate root page failed when splitting");
            let root_id = root_guard.id();
            {
                let mut root = root_guard.write();
                *root = IndexPage::new_internal(root_id, INVALID_PAGE_ID, self.internal_max_size);
                root.init_root(left.id(), risen_key, right.id());
            }
            left.write().set_parent(root_id);
            right.write().set_parent(root_id);
            self.root_page_id = root_id;
            self.update_root_page_id(false);
            return;
        }

        let mut parent_guard = self.buffer_pool
            .fetch_page(parent_id)
            .expect("fetch parent page failed");

        // room in the parent: the split page already carries the parent id
        let parent_size = parent_guard.read().size();
        if parent_size < self.internal_max_size {
            parent_guard.write().insert_child(risen_key, right.id());
            return;
        }

        // the parent is full too: split it around the incoming pair
        let mut split_guard = self.buffer_pool
            .create_page()
            .expect("allocate internal page failed when splitting");
        let split_id = split_guard.id();
        let parent_risen_key = {
            let mut parent = parent_guard.write();
            let sibling = parent.split_internal(split_id, risen_key, right.id());
            let risen = sibling.key_at(0);
            *split_guard.write() = sibling;
            risen
        };

        // children that moved to the new page get their parent rewritten
        let moved: Vec<PageId> = {
            let page = split_guard.read();
            (0..page.size()).map(|i| page.value_at(i)).collect()
        };
        for child_id in moved {
            let mut child_guard = self.buffer_pool
                .fetch_page(child_id)
                .expect("fetch child page failed");
            child_guard.write().set_parent(split_id);
        }

        self.insert_risen_key_to_parent(parent_risen_key, &mut parent_guard, &mut split_guard);
    }

    /// Repair a leaf that may have fallen below half full after a delete
    fn rebalance_leaf(&mut self, mut leaf_guard: PageGuard<IndexPage>, txn: &mut Transaction) {
        let leaf_id = leaf_guard.id();
        let (is_root, size, min_size, parent_id) = {
            let page = leaf_guard.read();
            (page.is_root(), page.size(), page.min_size(), page.get_parent())
        };

        if is_root {
            if size == 0 {
                // the tree lost its last record
                txn.add_deleted_page(leaf_id);
                self.root_page_id = INVALID_PAGE_ID;
                self.update_root_page_id(false);
            }
            return;
        }
        if size >= min_size {
            return;
        }

        let mut parent_guard = self.buffer_pool
            .fetch_page(parent_id)
            .expect("fetch parent page failed");
        let pos = parent_guard.read()
            .value_position(leaf_id)
            .expect("child not found in parent");
        debug_assert!(parent_guard.read().size() > 1);

        // borrow from the previous sibling when there is one
        let prev_sibling = pos > 0;
        let sibling_pos = if prev_sibling { pos - 1 } else { pos + 1 };
        let sibling_id = parent_guard.read().value_at(sibling_pos);
        let mut sibling_guard = self.buffer_pool
            .fetch_page(sibling_id)
            .expect("fetch sibling page failed");

        let (sibling_size, sibling_min) = {
            let page = sibling_guard.read();
            (page.size(), page.min_size())
        };

        if sibling_size > sibling_min {
            // redistribute one pair across the boundary and fix the separator
            if prev_sibling {
                let new_separator = {
                    let mut sibling = sibling_guard.write();
                    let mut leaf = leaf_guard.write();
                    sibling.move_rear_to_front_of(&mut leaf);
                    leaf.key_at(0)
                };
                parent_guard.write().set_key_at(pos, new_separator);
            } else {
                let new_separator = {
                    let mut sibling = sibling_guard.write();
                    let mut leaf = leaf_guard.write();
                    sibling.move_front_to_rear_of(&mut leaf);
                    sibling.key_at(0)
                };
                parent_guard.write().set_key_at(sibling_pos, new_separator);
            }
            return;
        }

        // coalesce into the left participant and drop its slot from the parent
        if prev_sibling {
            {
                let mut sibling = sibling_guard.write();
                let mut leaf = leaf_guard.write();
                leaf.move_all_to(&mut sibling);
            }
            parent_guard.write().remove_at(pos);
            txn.add_deleted_page(leaf_id);
        } else {
            {
                let mut sibling = sibling_guard.write();
                let mut leaf = leaf_guard.write();
                sibling.move_all_to(&mut leaf);
            }
            parent_guard.write().remove_at(sibling_pos);
            txn.add_deleted_page(sibling_id);
        }

        drop(leaf_guard);
        drop(sibling_guard);
        self.rebalance_internal(parent_guard, txn);
    }

    /// Repair an internal page after a coalesce removed one of its slots
    fn rebalance_internal(&mut self, mut node_guard: PageGuard<IndexPage>, txn: &mut Transaction) {
        let node_id = node_guard.id();
        let (is_root, size, min_size, parent_id) = {
            let page = node_guard.read();
            (page.is_root(), page.size(), page.min_size(), page.get_parent())
        };

        if is_root {
            if size == 1 {
                // the root routes through a single child: promote it
                let only_child_id = node_guard.read().value_at(0);
                let mut child_guard = self.buffer_pool
                    .fetch_page(only_child_id)
                    .expect("fetch child page failed");
                child_guard.write().set_parent(INVALID_PAGE_ID);
                self.root_page_id = only_child_id;
                self.update_root_page_id(false);
                txn.add_deleted_page(node_id);
            }
            return;
        }
        if size >= min_size {
            return;
        }

        let mut parent_guard = self.buffer_pool
            .fetch_page(parent_id)
            .expect("fetch parent page failed");
        let pos = parent_guard.read()
            .value_position(node_id)
            .expect("child not found in parent");
        debug_assert!(parent_guard.read().size() > 1);

        let prev_sibling = pos > 0;
        let sibling_pos = if prev_sibling { pos - 1 } else { pos + 1 };
        let sibling_id = parent_guard.read().value_at(sibling_pos);
        let mut sibling_guard = self.buffer_pool
            .fetch_page(sibling_id)
            .expect("fetch sibling page failed");

        let (sibling_size, sibling_min) = {
            let page = sibling_guard.read();
            (page.size(), page.min_size())
        };

        if sibling_size > sibling_min {
            // redistribute: the parent separator comes down into the
            // receiving side, the sibling's adjacent key goes up
            if prev_sibling {
                let separator = parent_guard.read().key_at(pos);
                let (lifted, moved_child) = {
                    let mut sibling = sibling_guard.write();
                    let mut node = node_guard.write();
                    sibling.move_rear_to_front_of_with(&mut node, separator);
                    (node.key_at(0), node.value_at(0))
                };
                parent_guard.write().set_key_at(pos, lifted);

                let mut child_guard = self.buffer_pool
                    .fetch_page(moved_child)
                    .expect("fetch child page failed");
                child_guard.write().set_parent(node_id);
            } else {
                let separator = parent_guard.read().key_at(sibling_pos);
                let (lifted, moved_child) = {
                    let mut sibling = sibling_guard.write();
                    let mut node = node_guard.write();
                    sibling.move_front_to_rear_of_with(&mut node, separator);
                    (sibling.key_at(0), node.value_at(node.size() - 1))
                };
                parent_guard.write().set_key_at(sibling_pos, lifted);

                let mut child_guard = self.buffer_pool
                    .fetch_page(moved_child)
                    .expect("fetch child page failed");
                child_guard.write().set_parent(node_id);
            }
            return;
        }

        // coalesce, bridging with the parent separator
        if prev_sibling {
            let separator = parent_guard.read().key_at(pos);
            let old_size = sibling_guard.read().size();
            {
                let mut sibling = sibling_guard.write();
                let mut node = node_guard.write();
                node.move_all_to_with(&mut sibling, separator);
            }
            let moved: Vec<PageId> = {
                let page = sibling_guard.read();
                (old_size..page.size()).map(|i| page.value_at(i)).collect()
            };
            for child_id in moved {
                let mut child_guard = self.buffer_pool
                    .fetch_page(child_id)
                    .expect("fetch child page failed");
                child_guard.write().set_parent(sibling_id);
            }
            parent_guard.write().remove_at(pos);
            txn.add_deleted_page(node_id);
        } else {
            let separator = parent_guard.read().key_at(sibling_pos);
            let old_size = node_guard.read().size();
            {
                let mut sibling = sibling_guard.write();
                let mut node = node_guard.write();
                sibling.move_all_to_with(&mut node, separator);
            }
            let moved: Vec<PageId> = {
                let page = node_guard.read();
                (old_size..page.size()).map(|i| page.value_at(i)).collect()
            };
            for child_id in moved {
                let mut child_guard = self.buffer_pool
                    .fetch_page(child_id)
                    .expect("fetch child page failed");
                child_guard.write().set_parent(node_id);
            }
            parent_guard.write().remove_at(sibling_pos);
            txn.add_deleted_page(sibling_id);
        }

        drop(node_guard);
        drop(sibling_guard);
        self.rebalance_internal(parent_guard, txn);
    }

    /// Persist the current root page id under the index name. The first
    /// call for a new index inserts the header record, later calls update
    /// it in place.
    fn update_root_page_id(&self, insert_record: bool) {
        let mut header_guard = self.header_pool
            .fetch_page(HEADER_PAGE_ID)
            .expect("fetch header page failed");
        let mut header = header_guard.write();
        if !insert_record || !header.insert_record(&self.index_name, self.root_page_id) {
            header.update_record(&self.index_name, self.root_page_id);
        }
        debug!(index = %self.index_name, root = self.root_page_id, "root page id updated");
    }
}

/// Forward iterator over the leaf chain. Holds a pin on the current leaf
/// and releases it when advanced past or dropped.
pub struct TreeIterator {
    buffer_pool: Arc<BufferPool<IndexPage>>,
    leaf: Option<PageGuard<IndexPage>>,
    page_id: PageId,
    index: usize,
}

impl TreeIterator {
    fn empty(buffer_pool: Arc<BufferPool<IndexPage>>) -> Self {
        TreeIterator { buffer_pool, leaf: None, page_id: INVALID_PAGE_ID, index: 0 }
    }

    fn at(buffer_pool: Arc<BufferPool<IndexPage>>, guard: PageGuard<IndexPage>, index: usize) -> Self {
        let page_id = guard.id();
        TreeIterator { buffer_pool, leaf: Some(guard), page_id, index }
    }

    /// True once the iterator sits past the last pair of the last leaf
    pub fn is_end(&self) -> bool {
        match &self.leaf {
            None => true,
            Some(guard) => {
                let page = guard.read();
                page.get_next() == INVALID_PAGE_ID && self.index == page.size()
            }
        }
    }
}

impl Iterator for TreeIterator {
    type Item = (i64, RecordId);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let guard = self.leaf.as_ref()?;
            let (size, next_id) = {
                let page = guard.read();
                (page.size(), page.get_next())
            };

            if self.index < size {
                let item = guard.read().item_at(self.index);
                self.index += 1;
                return Some(item);
            }

            if next_id == INVALID_PAGE_ID {
                return None;
            }

            // switch to the next leaf; the old pin drops with the guard
            let next_guard = self.buffer_pool
                .fetch_page(next_id)
                .expect("fetch next leaf failed");
            self.page_id = next_guard.id();
            self.index = 0;
            self.leaf = Some(next_guard);
        }
    }
}

impl PartialEq for TreeIterator {
    fn eq(&self, other: &Self) -> bool {
        self.page_id == other.page_id && self.index == other.index
    }
}
