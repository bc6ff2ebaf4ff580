//! CLI command implementations.

pub mod page;
pub mod scan;
pub mod session;

pub use page::{show_page, PageOptions};
pub use scan::scan_pages;
