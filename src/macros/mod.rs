pub mod page_macros;
