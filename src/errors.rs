use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("disk capacity exhausted, all {num_blocks} blocks in use")]
    OutOfCapacity { num_blocks: usize },
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
