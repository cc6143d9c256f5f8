pub mod product;
pub mod sync_log;
pub mod token;
