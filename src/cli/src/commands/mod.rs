pub mod bucket;
pub mod cursor;
pub mod log;
pub mod snapshot;
