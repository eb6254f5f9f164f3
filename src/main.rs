use std::io::{stdin, stdout, BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use votedb::{
    engine::{DeleteReport, Engine, FindReport, ScanReport},
    loader,
};

#[derive(Parser)]
#[command(about = "In-memory block store with a B+ tree index over numVotes")]
struct Options {
    /// Tab-separated ratings file (tconst, averageRating, numVotes)
    data: PathBuf,

    /// Simulated disk size in MB
    #[arg(long, default_value_t = 100)]
    disk_size_mb: usize,

    /// Block size in bytes
    #[arg(long, default_value_t = 200)]
    block_size: usize,
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();
    let options = Options::parse();

    let mut engine = Engine::new(options.disk_size_mb * 1_000_000, options.block_size);

    println!("Reading in TSV file, please wait...");
    let records = loader::load_tsv(&options.data)
        .with_context(|| format!("failed to read {}", options.data.display()))?;
    let report = engine.import(records)?;

    println!("Number of records: {}", report.num_records);
    println!("Size of a record: {} B", report.record_size);
    println!("Number of records stored in a block: {}", report.records_per_block);
    println!("Number of blocks for storing the data: {}", report.num_blocks);

    let mut writer = stdout();
    print_help(&mut writer)?;
    prompt(&mut writer)?;
    for line in stdin().lock().lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        match words.next() {
            Some("find") => match parse_range(words.next(), words.next()) {
                Some((lo, hi)) => print_find(&mut writer, &engine.find(lo, hi))?,
                None => writeln!(writer, "usage: find <lo> [hi]")?,
            },
            Some("scan") => match parse_range(words.next(), words.next()) {
                Some((lo, hi)) => print_scan(&mut writer, &engine.scan(lo, hi))?,
                None => writeln!(writer, "usage: scan <lo> [hi]")?,
            },
            Some("delete") => match words.next().and_then(|w| w.parse().ok()) {
                Some(key) => print_delete(&mut writer, &engine.delete(key))?,
                None => writeln!(writer, "usage: delete <key>")?,
            },
            Some("stats") => print_stats(&mut writer, &engine)?,
            Some("tree") => engine.dump_index(&mut writer)?,
            Some("quit") | Some("exit") => break,
            Some(other) => writeln!(writer, "unknown command: {}", other)?,
            None => {}
        }
        prompt(&mut writer)?;
    }
    Ok(())
}

fn parse_range(lo: Option<&str>, hi: Option<&str>) -> Option<(u32, u32)> {
    let lo: u32 = lo?.parse().ok()?;
    let hi: u32 = match hi {
        Some(word) => word.parse().ok()?,
        None => lo,
    };
    Some((lo, hi))
}

fn prompt<W: Write>(writer: &mut W) -> Result<(), anyhow::Error> {
    write!(writer, "> ")?;
    writer.flush()?;
    Ok(())
}

fn print_help<W: Write>(writer: &mut W) -> Result<(), anyhow::Error> {
    writeln!(
        writer,
        "commands: find <lo> [hi] | scan <lo> [hi] | delete <key> | stats | tree | quit"
    )?;
    Ok(())
}

fn print_find<W: Write>(writer: &mut W, report: &FindReport) -> Result<(), anyhow::Error> {
    for record in &report.records {
        writeln!(
            writer,
            "{:>10} {:>12} {:>6.1} {:>10}",
            record.record_id,
            record.tconst_str(),
            record.average_rating,
            record.num_votes
        )?;
    }
    writeln!(writer, "Records retrieved: {}", report.records.len())?;
    writeln!(writer, "Index nodes accessed: {}", report.index_nodes_accessed)?;
    writeln!(
        writer,
        "Overflow nodes accessed: {}",
        report.overflow_nodes_accessed
    )?;
    writeln!(writer, "Data blocks accessed: {}", report.blocks_accessed)?;
    if let Some(average) = report.average_rating {
        writeln!(writer, "Average of averageRating: {:.3}", average)?;
    }
    writeln!(writer, "Elapsed: {:?}", report.elapsed)?;
    Ok(())
}

fn print_scan<W: Write>(writer: &mut W, report: &ScanReport) -> Result<(), anyhow::Error> {
    writeln!(writer, "Records retrieved: {}", report.records.len())?;
    writeln!(writer, "Data blocks accessed: {}", report.blocks_accessed)?;
    if let Some(average) = report.average_rating {
        writeln!(writer, "Average of averageRating: {:.3}", average)?;
    }
    writeln!(writer, "Elapsed: {:?}", report.elapsed)?;
    Ok(())
}

fn print_delete<W: Write>(writer: &mut W, report: &DeleteReport) -> Result<(), anyhow::Error> {
    writeln!(writer, "Records deleted: {}", report.records_deleted)?;
    writeln!(writer, "Data blocks accessed: {}", report.blocks_accessed)?;
    writeln!(writer, "Elapsed: {:?}", report.elapsed)?;
    Ok(())
}

fn print_stats<W: Write>(writer: &mut W, engine: &Engine) -> Result<(), anyhow::Error> {
    writeln!(writer, "Records: {}", engine.num_records())?;
    writeln!(writer, "Data blocks: {}", engine.num_blocks())?;
    writeln!(writer, "Records per block: {}", engine.max_records())?;
    writeln!(writer, "Index parameter n: {}", engine.max_keys())?;
    writeln!(writer, "Index nodes: {}", engine.num_nodes())?;
    writeln!(writer, "Overflow nodes: {}", engine.num_overflow_nodes())?;
    writeln!(writer, "Height: {}", engine.height())?;
    writeln!(writer, "Root keys: {:?}", engine.root_keys())?;
    Ok(())
}
