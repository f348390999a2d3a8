pub mod bufferpool;
pub mod disk_manager;
pub mod extendible_hash;
pub mod replacement_strategy;
pub mod bplus_tree;
pub mod page;
pub mod transaction;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use bufferpool::BufferPool;
use bplus_tree::BPlusTree;
use disk_manager::{DiskManager, FileDiskManager};
use page::header_page::HeaderPage;
use page::index_page::{get_internal_capacity, get_leaf_capacity, IndexPage};
use replacement_strategy::ReplacementStrategyType;
use crate::types::{
    PageId, CONFIG_FILE, DEFAULT_BUFFERPOOL_SIZE, DEFAULT_REPLACER_K,
    HEADER_FILE, HEADER_PAGE_ID, INDEX_FILE,
};

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_dir: PathBuf,
    pub bufferpool_capacity: usize,
    pub bufferpool_replacement_strategy: ReplacementStrategyType,
    pub leaf_max_size: usize,
    pub internal_max_size: usize,
}

impl StorageConfig {
    pub fn new(database_dir: PathBuf) -> Self {
        StorageConfig {
            database_dir,
            bufferpool_capacity: DEFAULT_BUFFERPOOL_SIZE,
            bufferpool_replacement_strategy: ReplacementStrategyType::LruK {
                k: DEFAULT_REPLACER_K,
            },
            leaf_max_size: get_leaf_capacity(),
            internal_max_size: get_internal_capacity(),
        }
    }

    /// Load a saved config from the database directory
    pub fn load(database_dir: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(database_dir.join(CONFIG_FILE))?;
        serde_json::from_str(&text).map_err(io::Error::other)
    }

    /// Persist this config next to the data files
    pub fn save(&self) -> io::Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(self.database_dir.join(CONFIG_FILE), text)
    }
}

pub struct StorageEngine {
    // buffer pool over the index file
    pub index_pool: Arc<BufferPool<IndexPage>>,

    // buffer pool over the header file (root-id records)
    pub header_pool: Arc<BufferPool<HeaderPage>>,

    // underlying disk managers
    pub index_disk: Arc<dyn DiskManager<IndexPage>>,
    pub header_disk: Arc<dyn DiskManager<HeaderPage>>,

    config: StorageConfig,
}

impl StorageEngine {
    /// Create a storage engine given a config. This will:
    /// - open the index and header file managers,
    /// - build a buffer pool over each,
    /// - make sure the header page exists.
    pub fn new(config: StorageConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.database_dir)?;
        let index_path = config.database_dir.join(INDEX_FILE);
        let header_path = config.database_dir.join(HEADER_FILE);

        let index_disk = Arc::new(FileDiskManager::<IndexPage>::open(&index_path)?);
        let header_disk = Arc::new(FileDiskManager::<HeaderPage>::open(&header_path)?);

        // page allocation resumes after whatever the files already hold
        let index_pool = Arc::new(BufferPool::new_with_first_page(
            config.bufferpool_capacity,
            config.bufferpool_replacement_strategy,
            index_disk.clone(),
            index_disk.num_pages() as PageId,
        ));
        let header_pool = Arc::new(BufferPool::new_with_first_page(
            1,
            config.bufferpool_replacement_strategy,
            header_disk.clone(),
            header_disk.num_pages() as PageId,
        ));

        // a fresh header file gets its record page up front
        if header_disk.num_pages() == 0 {
            let guard = header_pool.create_page().expect("create header page failed");
            debug_assert_eq!(guard.id(), HEADER_PAGE_ID);
            drop(guard);
            header_pool.flush_page(HEADER_PAGE_ID).expect("flush header page failed");
        }

        Ok(StorageEngine {
            index_pool,
            header_pool,
            index_disk,
            header_disk,
            config,
        })
    }

    /// Open (or create on first insert) the named index
    pub fn open_index(&self, name: &str) -> BPlusTree {
        BPlusTree::new(
            name,
            Arc::clone(&self.index_pool),
            Arc::clone(&self.header_pool),
            self.config.leaf_max_size,
            self.config.internal_max_size,
        )
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Deactivate storage engine and flush all dirty pages
    pub fn deactivate(&mut self) {
        self.index_pool.flush_all();
        self.header_pool.flush_all();
    }
}
