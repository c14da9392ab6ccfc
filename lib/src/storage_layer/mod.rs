pub mod buffer_pool;
pub mod column_page;
pub mod config;
pub mod error;
pub mod indices;
pub mod page_list;
pub mod page_range;
pub mod storage;
pub mod utils;
