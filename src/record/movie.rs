use crate::page::Page;

/// `tconst` identifier width: 10 significant bytes plus a NUL terminator.
pub const TCONST_LEN: usize = 11;

/// On-block size of a record: record_id + tconst + average_rating + num_votes.
pub const RECORD_SIZE: usize = 4 + TCONST_LEN + 4 + 4;

/// One movie row. `num_votes` is the indexed attribute.
///
/// Records are immutable once written; there is no update operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovieRecord {
    pub record_id: u32,
    pub tconst: [u8; TCONST_LEN],
    pub average_rating: f32,
    pub num_votes: u32,
}

impl MovieRecord {
    /// Truncates or NUL-pads `tconst` to 10 characters + NUL.
    pub fn new(record_id: u32, tconst: &str, average_rating: f32, num_votes: u32) -> Self {
        let mut fixed = [0u8; TCONST_LEN];
        let bytes = tconst.as_bytes();
        let len = bytes.len().min(TCONST_LEN - 1);
        fixed[..len].copy_from_slice(&bytes[..len]);
        MovieRecord {
            record_id,
            tconst: fixed,
            average_rating,
            num_votes,
        }
    }

    pub fn tconst_str(&self) -> &str {
        let end = self
            .tconst
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TCONST_LEN);
        std::str::from_utf8(&self.tconst[..end]).unwrap_or("")
    }

    pub(crate) fn write_to(&self, page: &mut Page, offset: usize) {
        page.set_u32(offset, self.record_id);
        page.set_bytes(offset + 4, &self.tconst);
        page.set_f32(offset + 4 + TCONST_LEN, self.average_rating);
        page.set_u32(offset + 8 + TCONST_LEN, self.num_votes);
    }

    pub(crate) fn read_from(page: &Page, offset: usize) -> Self {
        let mut tconst = [0u8; TCONST_LEN];
        tconst.copy_from_slice(page.get_bytes(offset + 4, TCONST_LEN));
        MovieRecord {
            record_id: page.get_u32(offset),
            tconst,
            average_rating: page.get_f32(offset + 4 + TCONST_LEN),
            num_votes: page.get_u32(offset + 8 + TCONST_LEN),
        }
    }
}
