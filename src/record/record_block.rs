//! A data block seen through its slot directory.
//!
//! Layout from offset 0:
//! - `num_records` (4 bytes): count of currently live slots.
//! - the directory: `(record_id, index_of_record)` pairs of 8 bytes each,
//!   grown forward. `index_of_record = -1` marks a tombstone, and a pair
//!   of all zeroes marks a slot that has never been used.
//! - records grown backward from the block tail; the entry at directory
//!   position `k` refers to the record at
//!   `block_end - (k + 1) * RECORD_SIZE`.
//!
//! Record id 0 is reserved so that tombstoned and never-used directory
//! entries can never match a lookup.

use crate::page::Page;

use super::movie::{MovieRecord, RECORD_SIZE};

const NUM_RECORDS_OFFSET: usize = 0;
const DIRECTORY_OFFSET: usize = std::mem::size_of::<u32>();

pub const SLOT_SIZE: usize = 8;

pub fn max_records(block_size: usize) -> usize {
    (block_size - DIRECTORY_OFFSET) / (RECORD_SIZE + SLOT_SIZE)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SlotEntry {
    pub record_id: u32,
    pub index_of_record: i32,
}

impl SlotEntry {
    pub fn is_tombstone(&self) -> bool {
        self.index_of_record == -1
    }

    pub fn is_live(&self) -> bool {
        self.record_id != 0 && !self.is_tombstone()
    }
}

pub(crate) struct RecordBlock<'a> {
    page: &'a Page,
    max_records: usize,
}

impl<'a> RecordBlock<'a> {
    pub fn new(page: &'a Page) -> Self {
        let max_records = max_records(page.size());
        RecordBlock { page, max_records }
    }

    pub fn num_records(&self) -> usize {
        self.page.get_u32(NUM_RECORDS_OFFSET) as usize
    }

    pub fn slot(&self, i: usize) -> SlotEntry {
        slot_at(self.page, i)
    }

    /// Looks a record up by id. Live slots can sit above `num_records`
    /// while holes exist below them, so the whole directory is scanned.
    pub fn find(&self, record_id: u32) -> Option<MovieRecord> {
        for i in 0..self.max_records {
            let entry = self.slot(i);
            if entry.record_id == record_id && !entry.is_tombstone() {
                return Some(self.record_at(entry.index_of_record as usize));
            }
        }
        None
    }

    pub fn live_records(&self) -> Vec<MovieRecord> {
        (0..self.max_records)
            .map(|i| self.slot(i))
            .filter(|entry| entry.is_live())
            .map(|entry| self.record_at(entry.index_of_record as usize))
            .collect()
    }

    fn record_at(&self, index: usize) -> MovieRecord {
        MovieRecord::read_from(self.page, record_offset(self.page.size(), index))
    }
}

pub(crate) struct RecordBlockMut<'a> {
    page: &'a mut Page,
    max_records: usize,
}

impl<'a> RecordBlockMut<'a> {
    pub fn new(page: &'a mut Page) -> Self {
        let max_records = max_records(page.size());
        RecordBlockMut { page, max_records }
    }

    pub fn num_records(&self) -> usize {
        self.page.get_u32(NUM_RECORDS_OFFSET) as usize
    }

    pub fn is_full(&self) -> bool {
        self.num_records() == self.max_records
    }

    /// Places a record in this block and returns its slot position.
    ///
    /// The last tombstone in the directory is revived if one exists,
    /// otherwise the record is appended at position `num_records`. Either
    /// way the live count goes up by one. The caller must check capacity.
    pub fn insert(&mut self, record: &MovieRecord) -> usize {
        assert!(!self.is_full());
        let mut position = self.num_records();
        for i in 0..self.max_records {
            if slot_at(self.page, i).is_tombstone() {
                position = i;
            }
        }

        record.write_to(self.page, record_offset(self.page.size(), position));
        set_slot_at(
            self.page,
            position,
            SlotEntry {
                record_id: record.record_id,
                index_of_record: position as i32,
            },
        );
        let num_records = self.num_records();
        self.page
            .set_u32(NUM_RECORDS_OFFSET, num_records as u32 + 1);
        position
    }

    /// Tombstones the slot holding `record_id`. Returns false if the id
    /// is not present (or already tombstoned).
    pub fn delete(&mut self, record_id: u32) -> bool {
        for i in 0..self.max_records {
            let entry = slot_at(self.page, i);
            if entry.record_id == record_id && !entry.is_tombstone() {
                set_slot_at(
                    self.page,
                    i,
                    SlotEntry {
                        record_id: 0,
                        index_of_record: -1,
                    },
                );
                let num_records = self.num_records();
                self.page
                    .set_u32(NUM_RECORDS_OFFSET, num_records as u32 - 1);
                return true;
            }
        }
        false
    }
}

fn slot_at(page: &Page, i: usize) -> SlotEntry {
    let offset = DIRECTORY_OFFSET + i * SLOT_SIZE;
    SlotEntry {
        record_id: page.get_u32(offset),
        index_of_record: page.get_i32(offset + 4),
    }
}

fn set_slot_at(page: &mut Page, i: usize, entry: SlotEntry) {
    let offset = DIRECTORY_OFFSET + i * SLOT_SIZE;
    page.set_u32(offset, entry.record_id);
    page.set_i32(offset + 4, entry.index_of_record);
}

fn record_offset(block_size: usize, index: usize) -> usize {
    block_size - (index + 1) * RECORD_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u32, votes: u32) -> MovieRecord {
        MovieRecord::new(id, &format!("tt{:07}", id), 5.0, votes)
    }

    #[test]
    fn test_insert_and_find() {
        // (200 - 4) / (23 + 8) = 6 records per block
        let mut page = Page::new(200);
        assert_eq!(max_records(200), 6);

        for id in 1..=6 {
            let mut block = RecordBlockMut::new(&mut page);
            assert_eq!(block.insert(&record(id, id * 10)), id as usize - 1);
        }

        let block = RecordBlock::new(&page);
        assert_eq!(block.num_records(), 6);
        assert_eq!(block.find(4).map(|r| r.num_votes), Some(40));
        assert_eq!(block.find(99), None);
    }

    #[test]
    fn test_delete_marks_tombstone() {
        let mut page = Page::new(200);
        let mut block = RecordBlockMut::new(&mut page);
        for id in 1..=3 {
            block.insert(&record(id, id));
        }
        assert!(block.delete(2));
        assert!(!block.delete(2));
        assert_eq!(block.num_records(), 2);

        let block = RecordBlock::new(&page);
        assert!(block.slot(1).is_tombstone());
        assert_eq!(block.find(2), None);
        assert_eq!(block.find(3).map(|r| r.record_id), Some(3));
    }

    #[test]
    fn test_insert_revives_last_tombstone() {
        let mut page = Page::new(200);
        let mut block = RecordBlockMut::new(&mut page);
        for id in 1..=6 {
            block.insert(&record(id, id));
        }
        block.delete(2);
        block.delete(5);
        assert_eq!(block.num_records(), 4);

        // Slot 4 (the later tombstone) is reused first, then slot 1.
        assert_eq!(block.insert(&record(7, 7)), 4);
        assert_eq!(block.insert(&record(8, 8)), 1);
        assert!(block.is_full());

        let block = RecordBlock::new(&page);
        assert_eq!(block.find(7).map(|r| r.record_id), Some(7));
        assert_eq!(block.find(8).map(|r| r.record_id), Some(8));
    }

    #[test]
    fn test_find_reaches_live_slots_above_holes() {
        let mut page = Page::new(200);
        let mut block = RecordBlockMut::new(&mut page);
        for id in 1..=6 {
            block.insert(&record(id, id));
        }
        for id in 1..=4 {
            block.delete(id);
        }

        // num_records is 2 but the live slots are positions 4 and 5.
        assert_eq!(block.num_records(), 2);
        let block = RecordBlock::new(&page);
        assert_eq!(block.find(5).map(|r| r.record_id), Some(5));
        assert_eq!(block.find(6).map(|r| r.record_id), Some(6));
        assert_eq!(block.live_records().len(), 2);
    }
}
