use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use log::warn;

use crate::{errors::LoadError, record::MovieRecord};

/// Reads a tab-separated ratings file with a `tconst averageRating
/// numVotes` header row. Empty lines are skipped, malformed rows are
/// skipped with a warning, and record ids are handed out from 1 in file
/// order.
pub fn load_tsv(path: &Path) -> Result<Vec<MovieRecord>, LoadError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut next_record_id = 1u32;
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        if line_number == 0 || line.is_empty() {
            continue;
        }
        match parse_row(&line, next_record_id) {
            Some(record) => {
                records.push(record);
                next_record_id += 1;
            }
            None => warn!("skipping malformed row {}: {:?}", line_number + 1, line),
        }
    }
    Ok(records)
}

fn parse_row(line: &str, record_id: u32) -> Option<MovieRecord> {
    let mut fields = line.split('\t');
    let tconst = fields.next()?;
    let average_rating = fields.next()?.trim().parse::<f32>().ok()?;
    let num_votes = fields.next()?.trim().parse::<u32>().ok()?;
    Some(MovieRecord::new(record_id, tconst, average_rating, num_votes))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_tsv(content: &str) -> Result<tempfile::NamedTempFile, anyhow::Error> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(content.as_bytes())?;
        Ok(file)
    }

    #[test]
    fn test_load_skips_header_and_empty_lines() -> Result<(), anyhow::Error> {
        let file = write_tsv(
            "tconst\taverageRating\tnumVotes\n\
             tt0000001\t5.6\t1645\n\
             \n\
             tt0000002\t6.0\t198\n",
        )?;
        let records = load_tsv(file.path())?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_id, 1);
        assert_eq!(records[0].tconst_str(), "tt0000001");
        assert_eq!(records[0].average_rating, 5.6);
        assert_eq!(records[0].num_votes, 1645);
        assert_eq!(records[1].record_id, 2);
        Ok(())
    }

    #[test]
    fn test_malformed_rows_are_skipped() -> Result<(), anyhow::Error> {
        let file = write_tsv(
            "tconst\taverageRating\tnumVotes\n\
             tt0000001\t5.6\t1645\n\
             tt0000002\t6.0\n\
             tt0000003\tsix\t198\n\
             tt0000004\t6.1\tmany\n\
             tt0000005\t7.2\t42\n",
        )?;
        let records = load_tsv(file.path())?;
        assert_eq!(records.len(), 2);
        // Ids stay dense even when rows are dropped.
        assert_eq!(records[0].record_id, 1);
        assert_eq!(records[1].record_id, 2);
        assert_eq!(records[1].tconst_str(), "tt0000005");
        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_tsv(Path::new("does-not-exist.tsv")).is_err());
    }
}
