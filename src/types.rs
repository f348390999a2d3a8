// global constants
// page configs
pub const PAGE_SIZE: usize = 4096;

// global types
pub type PageId = i32;
pub type FrameId = usize;
pub type SlotId = u8;

// sentinel page ids
pub const INVALID_PAGE_ID: PageId = -1;
pub const HEADER_PAGE_ID: PageId = 0;

// defined constants
pub const FLUSH: bool = true;
pub const NO_FLUSH: bool = false;

// global file names
pub const INDEX_FILE: &str = "index.sdb";
pub const HEADER_FILE: &str = "header.sdb";
pub const CONFIG_FILE: &str = "config.json";

// default storage engine configuration
pub const DEFAULT_BUFFERPOOL_SIZE: usize = 32;
pub const DEFAULT_REPLACER_K: usize = 2;
