use crate::storage::page::Page;
use crate::types::{PageId, PAGE_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

pub trait DiskManager<P: Page>: Send + Sync {
    fn read_page(&self, id: PageId) -> Option<P>;
    fn write_page(&self, page: &P);

    /// Hand a deleted page id back for reclamation. File-backed storage
    /// keeps the slot in place, so the default is a no-op.
    fn deallocate_page(&self, _id: PageId) {}
}

pub struct FileDiskManager<P: Page> {
    file: Mutex<File>,
    _phantom: std::marker::PhantomData<P>,
}

impl<P: Page> FileDiskManager<P> {

    // open file on disk
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        Ok(FileDiskManager {
            file: Mutex::new(file),
            _phantom: std::marker::PhantomData,
        })
    }

    /// Number of whole pages the backing file currently holds
    pub fn num_pages(&self) -> usize {
        let file = self.file.lock().unwrap();
        file.metadata().map(|m| m.len() as usize / PAGE_SIZE).unwrap_or(0)
    }

    // get offset of page in disk
    fn get_offset(page_id: PageId) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }
}

impl<P: Page> DiskManager<P> for FileDiskManager<P> {

    /// Read a page from disk
    fn read_page(&self, id: PageId) -> Option<P> {
        if id < 0 {
            return None;
        }
        let mut buf = [0u8; PAGE_SIZE];
        let mut file = self.file.lock().unwrap();

        if file.seek(SeekFrom::Start(Self::get_offset(id))).is_err() {
            return None;
        }

        if file.read_exact(&mut buf).is_err() {
            return None;
        }

        P::deserialize(&buf)
    }

    /// Write a page to disk
    fn write_page(&self, page: &P) {
        let buf = page.serialize();
        let mut file = self.file.lock().unwrap();

        if file.seek(SeekFrom::Start(Self::get_offset(page.get_id()))).is_err() {
            return;
        }

        let _ = file.write_all(&buf);
        let _ = file.flush();
    }
}
