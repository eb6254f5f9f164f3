use std::{
    collections::BTreeSet,
    io,
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{
    errors::StorageError,
    index::BPlusTree,
    record::{MovieRecord, RECORD_SIZE},
    store::BlockStore,
};

/// The engine facade: owns the block store and the index and keeps them
/// consistent. Every record placed in the store is registered in the
/// index under its `num_votes`, and every delete goes through both.
pub struct Engine {
    store: BlockStore,
    index: BPlusTree,
}

#[derive(Debug)]
pub struct ImportReport {
    pub num_records: usize,
    pub record_size: usize,
    pub records_per_block: usize,
    pub num_blocks: usize,
}

#[derive(Debug)]
pub struct FindReport {
    pub records: Vec<MovieRecord>,
    pub index_nodes_accessed: usize,
    pub overflow_nodes_accessed: usize,
    pub blocks_accessed: usize,
    pub average_rating: Option<f32>,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct ScanReport {
    pub records: Vec<MovieRecord>,
    pub blocks_accessed: usize,
    pub average_rating: Option<f32>,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct DeleteReport {
    pub records_deleted: usize,
    pub blocks_accessed: usize,
    pub elapsed: Duration,
}

impl Engine {
    pub fn new(disk_size: usize, block_size: usize) -> Self {
        Engine {
            store: BlockStore::new(disk_size, block_size),
            index: BPlusTree::new(block_size),
        }
    }

    pub fn insert(&mut self, record: MovieRecord) -> Result<(), StorageError> {
        let handle = self.store.insert(&record)?;
        self.index.insert(record.num_votes, handle);
        Ok(())
    }

    pub fn import(&mut self, records: Vec<MovieRecord>) -> Result<ImportReport, StorageError> {
        for (count, record) in records.into_iter().enumerate() {
            self.insert(record)?;
            if (count + 1) % 10_000 == 0 {
                debug!("{} records inserted so far", count + 1);
            }
        }
        Ok(ImportReport {
            num_records: self.store.num_records(),
            record_size: RECORD_SIZE,
            records_per_block: self.store.max_records(),
            num_blocks: self.store.num_blocks(),
        })
    }

    /// Index-backed lookup of every record with `lo <= num_votes <= hi`.
    /// `find(k, k)` is the equality query.
    pub fn find(&mut self, lo: u32, hi: u32) -> FindReport {
        let start = Instant::now();
        let handles = self.index.find(lo, hi);

        let mut accessed_blocks = BTreeSet::new();
        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            accessed_blocks.insert(handle.block);
            match self.store.retrieve(handle) {
                Some(record) => records.push(record),
                None => warn!("index handle {:?} has no record behind it", handle),
            }
        }
        let elapsed = start.elapsed();

        FindReport {
            index_nodes_accessed: self.index.num_index_accessed(),
            overflow_nodes_accessed: self.index.num_overflow_accessed(),
            blocks_accessed: accessed_blocks.len(),
            average_rating: average_rating(&records),
            elapsed,
            records,
        }
    }

    /// Brute-force cross-check: walks every allocated block in allocation
    /// order instead of consulting the index.
    pub fn scan(&self, lo: u32, hi: u32) -> ScanReport {
        let start = Instant::now();
        let mut records = Vec::new();
        let mut blocks_accessed = 0;
        for addr in self.store.iter_blocks() {
            blocks_accessed += 1;
            for record in self.store.live_records_in(addr) {
                if record.num_votes >= lo && record.num_votes <= hi {
                    records.push(record);
                }
            }
        }
        let elapsed = start.elapsed();

        ScanReport {
            blocks_accessed,
            average_rating: average_rating(&records),
            elapsed,
            records,
        }
    }

    /// Deletes every record with `num_votes == key` from the store and
    /// removes the key from the index.
    pub fn delete(&mut self, key: u32) -> DeleteReport {
        let start = Instant::now();
        let handles = self.index.find(key, key);

        let mut accessed_blocks = BTreeSet::new();
        let mut records_deleted = 0;
        for handle in &handles {
            accessed_blocks.insert(handle.block);
            if self.store.delete(*handle) {
                records_deleted += 1;
            }
        }
        self.index.delete_key(key);

        DeleteReport {
            records_deleted,
            blocks_accessed: accessed_blocks.len(),
            elapsed: start.elapsed(),
        }
    }

    pub fn num_records(&self) -> usize {
        self.store.num_records()
    }

    pub fn num_blocks(&self) -> usize {
        self.store.num_blocks()
    }

    pub fn max_records(&self) -> usize {
        self.store.max_records()
    }

    pub fn height(&self) -> usize {
        self.index.height()
    }

    pub fn num_nodes(&self) -> usize {
        self.index.num_nodes()
    }

    pub fn num_overflow_nodes(&self) -> usize {
        self.index.num_overflow_nodes()
    }

    pub fn max_keys(&self) -> usize {
        self.index.max_keys()
    }

    pub fn root_keys(&self) -> Vec<u32> {
        self.index.root_keys()
    }

    pub fn dump_index(&self, writer: &mut impl io::Write) -> io::Result<()> {
        self.index.dump(writer)
    }
}

fn average_rating(records: &[MovieRecord]) -> Option<f32> {
    if records.is_empty() {
        return None;
    }
    let sum: f32 = records.iter().map(|r| r.average_rating).sum();
    Some(sum / records.len() as f32)
}
