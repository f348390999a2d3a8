mod common;

use common::{
    check_separators, collect_tree_pages, leaf_depths, setup_tree_pools, tree_height,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use stratus_db::storage::bplus_tree::BPlusTree;
use stratus_db::storage::bufferpool::BufferPool;
use stratus_db::storage::page::index_page::{IndexPage, RecordId};
use stratus_db::storage::transaction::Transaction;
use stratus_db::storage::{StorageConfig, StorageEngine};
use stratus_db::types::PageId;
use tempfile::TempDir;

fn rid(key: i64) -> RecordId {
    RecordId { page_id: key as PageId, slot_id: (key % 250) as u8 }
}

fn setup_tree(
    leaf_max: usize,
    internal_max: usize,
    capacity: usize,
) -> (BPlusTree, Arc<BufferPool<IndexPage>>) {
    let (index_pool, header_pool, _disk) = setup_tree_pools(capacity);
    let tree = BPlusTree::new("test_index", Arc::clone(&index_pool), header_pool, leaf_max, internal_max);
    (tree, index_pool)
}

fn remove_key(tree: &mut BPlusTree, key: i64) {
    let mut txn = Transaction::new();
    tree.remove(key, &mut txn);
}

#[test]
fn test_single_insert_and_lookup() {
    let (mut tree, _pool) = setup_tree(3, 4, 16);

    assert!(tree.is_empty());
    assert!(tree.insert(10, rid(10)));
    assert!(!tree.is_empty());
    assert_eq!(tree.get_value(10), Some(rid(10)));
    assert_eq!(tree.get_value(11), None);
}

#[test]
fn test_duplicate_insert_is_rejected() {
    let (mut tree, _pool) = setup_tree(3, 4, 16);

    assert!(tree.insert(10, rid(10)));
    assert!(!tree.insert(10, rid(99)));
    assert_eq!(tree.get_value(10), Some(rid(10)));
}

#[test]
fn test_remove_missing_key_is_quiet() {
    let (mut tree, _pool) = setup_tree(3, 4, 16);

    remove_key(&mut tree, 5);
    assert!(tree.is_empty());

    tree.insert(1, rid(1));
    remove_key(&mut tree, 5);
    assert_eq!(tree.get_value(1), Some(rid(1)));
}

#[test]
fn test_sequential_inserts_split_and_stay_shallow() {
    let (mut tree, pool) = setup_tree(3, 4, 32);

    for key in 1..=10 {
        assert!(tree.insert(key, rid(key)));
    }
    for key in 1..=10 {
        assert_eq!(tree.get_value(key), Some(rid(key)), "key {} must be reachable", key);
    }
    assert_eq!(tree.get_value(7), Some(rid(7)));
    assert!(tree_height(&pool, tree.root_page_id()) <= 3);
    check_separators(&pool, tree.root_page_id());

    remove_key(&mut tree, 4);
    assert_eq!(tree.get_value(4), None);
    for key in (1..=10).filter(|&k| k != 4) {
        assert_eq!(tree.get_value(key), Some(rid(key)));
    }
}

#[test]
fn test_descending_inserts() {
    let (mut tree, pool) = setup_tree(3, 4, 32);

    for key in (1..=40).rev() {
        assert!(tree.insert(key, rid(key)));
    }
    for key in 1..=40 {
        assert_eq!(tree.get_value(key), Some(rid(key)));
    }

    let keys: Vec<i64> = tree.begin().map(|(key, _)| key).collect();
    assert_eq!(keys, (1..=40).collect::<Vec<i64>>());
    check_separators(&pool, tree.root_page_id());
}

#[test]
fn test_all_leaves_at_equal_depth() {
    let (mut tree, pool) = setup_tree(3, 4, 64);

    let mut rng = StdRng::seed_from_u64(7);
    let mut keys: Vec<i64> = (1..=200).collect();
    keys.shuffle(&mut rng);
    for &key in &keys {
        tree.insert(key, rid(key));
    }

    let mut depths = Vec::new();
    leaf_depths(&pool, tree.root_page_id(), 1, &mut depths);
    let first = depths[0];
    assert!(depths.iter().all(|&d| d == first), "all leaves must sit at one depth");
}

#[test]
fn test_random_order_iteration_is_sorted() {
    let (mut tree, pool) = setup_tree(3, 4, 128);

    let mut rng = StdRng::seed_from_u64(42);
    let mut keys: Vec<i64> = (1..=100).collect();
    keys.shuffle(&mut rng);
    for &key in &keys {
        assert!(tree.insert(key, rid(key)));
    }

    let collected: Vec<(i64, RecordId)> = tree.begin().collect();
    let expected: Vec<(i64, RecordId)> = (1..=100).map(|k| (k, rid(k))).collect();
    assert_eq!(collected, expected);
    check_separators(&pool, tree.root_page_id());
}

#[test]
fn test_iterator_from_key() {
    let (mut tree, _pool) = setup_tree(3, 4, 64);
    for key in 1..=100 {
        tree.insert(key, rid(key));
    }

    let tail: Vec<i64> = tree.begin_at(37).map(|(key, _)| key).collect();
    assert_eq!(tail, (37..=100).collect::<Vec<i64>>());

    // starting past the largest key yields nothing
    let mut past_end = tree.begin_at(1000);
    assert!(past_end.is_end());
    assert_eq!(past_end.next(), None);
}

#[test]
fn test_iterator_on_empty_tree() {
    let (tree, _pool) = setup_tree(3, 4, 16);

    let mut iter = tree.begin();
    assert!(iter.is_end());
    assert_eq!(iter.next(), None);
}

#[test]
fn test_iterators_compare_by_position() {
    let (mut tree, _pool) = setup_tree(3, 4, 16);
    for key in 1..=5 {
        tree.insert(key, rid(key));
    }

    let a = tree.begin();
    let b = tree.begin();
    assert!(a == b);

    let mut c = tree.begin();
    c.next();
    assert!(a != c);
}

#[test]
fn test_mass_remove_keeps_remainder() {
    let (mut tree, _pool) = setup_tree(3, 4, 256);

    for key in 1..=255 {
        assert!(tree.insert(key, rid(key)));
    }
    for key in 1..=127 {
        remove_key(&mut tree, key);
    }

    for key in 1..=127 {
        assert_eq!(tree.get_value(key), None, "key {} must be gone", key);
    }
    for key in 128..=255 {
        assert_eq!(tree.get_value(key), Some(rid(key)), "key {} must remain", key);
    }

    let keys: Vec<i64> = tree.begin().map(|(key, _)| key).collect();
    assert_eq!(keys, (128..=255).collect::<Vec<i64>>());
}

#[test]
fn test_no_page_leaks_after_mass_remove() {
    // pool large enough that nothing is evicted, so the deallocation log
    // is a complete ledger
    let (index_pool, header_pool, disk) = setup_tree_pools(256);
    let mut tree = BPlusTree::new("ledger", Arc::clone(&index_pool), header_pool, 3, 4);

    for key in 1..=63 {
        tree.insert(key, rid(key));
    }
    for key in 1..=31 {
        remove_key(&mut tree, key);
    }

    let mut live = Vec::new();
    collect_tree_pages(&index_pool, tree.root_page_id(), &mut live);
    let live: HashSet<PageId> = live.into_iter().collect();
    let deallocated: HashSet<PageId> = disk.deallocated().into_iter().collect();

    assert!(!deallocated.is_empty());
    assert!(live.is_disjoint(&deallocated));

    // every allocated id (they are handed out from 0 upward) is either
    // still reachable or has been deallocated
    let max_id = *live.union(&deallocated).max().unwrap();
    for id in 0..=max_id {
        assert!(
            live.contains(&id) || deallocated.contains(&id),
            "page {} neither live nor deallocated",
            id
        );
    }
}

#[test]
fn test_remove_everything_empties_the_tree() {
    let (mut tree, _pool) = setup_tree(3, 4, 64);

    for key in 1..=64 {
        tree.insert(key, rid(key));
    }
    for key in 1..=64 {
        remove_key(&mut tree, key);
    }

    assert!(tree.is_empty());
    for key in 1..=64 {
        assert_eq!(tree.get_value(key), None);
    }
    assert!(tree.begin().is_end());

    // the tree grows again from scratch
    for key in 1..=64 {
        assert!(tree.insert(key, rid(key)));
    }
    for key in 1..=64 {
        assert_eq!(tree.get_value(key), Some(rid(key)));
    }
}

#[test]
fn test_interleaved_insert_remove_churn() {
    let (mut tree, _pool) = setup_tree(3, 4, 128);

    for key in 1..=64 {
        tree.insert(key, rid(key));
    }
    for key in (2..=64).step_by(2) {
        remove_key(&mut tree, key);
    }
    for key in 1..=64 {
        let expected = if key % 2 == 1 { Some(rid(key)) } else { None };
        assert_eq!(tree.get_value(key), expected);
    }

    for key in (2..=64).step_by(2) {
        assert!(tree.insert(key, rid(key)));
    }
    let keys: Vec<i64> = tree.begin().map(|(key, _)| key).collect();
    assert_eq!(keys, (1..=64).collect::<Vec<i64>>());
}

#[test]
fn test_concurrent_readers() {
    let (mut tree, _pool) = setup_tree(4, 5, 128);
    for key in 1..=100 {
        tree.insert(key, rid(key));
    }

    let tree = Arc::new(tree);
    let mut handles = vec![];
    for t in 0..4 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for key in 1..=100i64 {
                assert_eq!(tree.get_value(key), Some(rid(key)));
            }
            // interleave a full scan
            if t % 2 == 0 {
                let count = tree.begin().count();
                assert_eq!(count, 100);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_persistence_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = StorageConfig::new(PathBuf::from(temp_dir.path()));
    config.bufferpool_capacity = 16;
    config.leaf_max_size = 4;
    config.internal_max_size = 5;

    {
        let mut engine = StorageEngine::new(config.clone()).unwrap();
        let mut index = engine.open_index("orders_pk");
        for key in 1..=50 {
            assert!(index.insert(key, rid(key)));
        }
        engine.deactivate();
    }

    // a fresh engine over the same directory sees the persisted index
    let engine = StorageEngine::new(config).unwrap();
    let index = engine.open_index("orders_pk");
    assert!(!index.is_empty());
    for key in 1..=50 {
        assert_eq!(index.get_value(key), Some(rid(key)));
    }
}

#[test]
fn test_config_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = StorageConfig::new(PathBuf::from(temp_dir.path()));
    config.bufferpool_capacity = 7;
    config.leaf_max_size = 9;
    config.save().unwrap();

    let loaded = StorageConfig::load(temp_dir.path()).unwrap();
    assert_eq!(loaded.bufferpool_capacity, 7);
    assert_eq!(loaded.leaf_max_size, 9);
    assert_eq!(loaded.internal_max_size, config.internal_max_size);
}

#[test]
fn test_two_indexes_share_the_engine() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = StorageConfig::new(PathBuf::from(temp_dir.path()));
    config.bufferpool_capacity = 16;
    config.leaf_max_size = 3;
    config.internal_max_size = 4;

    let engine = StorageEngine::new(config).unwrap();
    let mut orders = engine.open_index("orders_pk");
    let mut users = engine.open_index("users_pk");

    for key in 1..=30 {
        orders.insert(key, rid(key));
        users.insert(key * 100, rid(key));
    }

    for key in 1..=30 {
        assert_eq!(orders.get_value(key), Some(rid(key)));
        assert_eq!(orders.get_value(key * 100), None);
        assert_eq!(users.get_value(key * 100), Some(rid(key)));
    }
}
