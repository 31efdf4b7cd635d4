use thiserror::Error;

mod disk;
mod memory;

pub use disk::{DiskStore, DiskStoreBuilder, slug_filename};
pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage error")]
    Storage(#[from] sled::Error),
    #[error("error decoding stored entry")]
    EntryDecode(#[from] rmp_serde::decode::Error),
    #[error("error encoding stored entry")]
    EntryEncode(#[from] rmp_serde::encode::Error),
}
