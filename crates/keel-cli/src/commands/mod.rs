pub mod common;
pub mod conflicts;
pub mod records;
pub mod sync;
