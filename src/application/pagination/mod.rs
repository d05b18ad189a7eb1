//! Offset and keyset pagination over article listings.

mod cursor;
mod resolver;

pub use cursor::{CURSOR_VERSION, Cursor, CursorError, filter_fingerprint};
pub use resolver::{
    PageInfo, PageLimits, PageMeta, PageRequest, PageResponse, PaginationMode, PaginationResolver,
};
