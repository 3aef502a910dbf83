use crate::error::Result;
use crate::index::docstore::DocStore;
use crate::index::reader::IndexReader;
use serde::Serialize;
use std::path::Path;

/// Size and shape of an index file
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub documents: u32,
    pub terms: u64,
    pub file_bytes: u64,
    pub dictionary_bytes: u64,
    pub postings_bytes: u64,
    pub restart_interval: u32,
    /// Mean number of documents per term
    pub avg_postings_len: f64,
    pub max_postings_len: u32,
    pub most_common_term: Option<String>,
    pub created_at: Option<u64>,
}

impl IndexStats {
    /// Scan the dictionary and postings headers of `reader`
    pub fn collect(reader: &IndexReader) -> Result<Self> {
        let mut stats = IndexStats {
            documents: reader.doc_count(),
            terms: reader.term_count(),
            file_bytes: reader.file_bytes(),
            dictionary_bytes: reader.dictionary_bytes(),
            postings_bytes: reader.postings_bytes(),
            restart_interval: reader.restart_interval(),
            ..Default::default()
        };

        let mut total: u64 = 0;
        for entry in reader.terms()? {
            let entry = entry?;
            let df = reader.doc_frequency(entry.postings)?;
            total += df as u64;
            if df > stats.max_postings_len {
                stats.max_postings_len = df;
                stats.most_common_term = Some(entry.term);
            }
        }
        if stats.terms > 0 {
            stats.avg_postings_len = total as f64 / stats.terms as f64;
        }
        Ok(stats)
    }
}

/// Statistics for the index at `path`, with the creation time of its docstore
pub fn index_stats(path: &Path) -> Result<IndexStats> {
    let reader = IndexReader::open(path)?;
    let mut stats = IndexStats::collect(&reader)?;
    stats.created_at = DocStore::load_for_index(path)?.map(|d| d.created_at);
    Ok(stats)
}

/// Print statistics for the index at `path`
pub fn show_stats(path: &Path) -> Result<()> {
    let stats = index_stats(path)?;

    println!("Index Statistics");
    println!("================");
    println!();
    println!("Index file:        {}", path.display());
    println!("Documents:         {}", stats.documents);
    println!("Terms:             {}", stats.terms);
    println!("Restart interval:  {}", stats.restart_interval);
    println!();
    println!("File size:         {}", format_size(stats.file_bytes));
    println!("Dictionary:        {}", format_size(stats.dictionary_bytes));
    println!("Postings:          {}", format_size(stats.postings_bytes));
    println!();
    println!("Avg postings len:  {:.2}", stats.avg_postings_len);
    if let Some(term) = &stats.most_common_term {
        println!("Most common term:  {} ({} docs)", term, stats.max_postings_len);
    }
    if let Some(ts) = stats.created_at {
        println!("Created:           {}", format_timestamp(ts));
    }
    Ok(())
}

/// Format byte size to human readable
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Seconds since the Unix epoch as `YYYY-MM-DD HH:MM:SS UTC`
fn format_timestamp(ts: u64) -> String {
    let (days, secs) = (ts / 86_400, ts % 86_400);

    // Civil date from days since 1970-01-01, with years starting in March
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
        year,
        month,
        day,
        secs / 3_600,
        secs % 3_600 / 60,
        secs % 60
    )
}
