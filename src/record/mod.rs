pub mod movie;
pub mod record_block;

pub use movie::{MovieRecord, RECORD_SIZE, TCONST_LEN};
