//! Terminal formatting for query results and term listings

use crate::index::dictionary::DictEntry;
use crate::index::docstore::DocStore;
use crate::query::QueryOutcome;
use std::io;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    pub color: bool,
    /// Print only the number of matches
    pub count_only: bool,
    /// Maximum documents to list; 0 lists all
    pub limit: usize,
}

fn stdout(color: bool) -> StandardStream {
    StandardStream::stdout(if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    })
}

/// Print the documents of a query outcome, by name when a docstore is given
pub fn print_outcome(
    outcome: &QueryOutcome,
    docs: Option<&DocStore>,
    options: OutputOptions,
) -> io::Result<()> {
    write_outcome(&mut stdout(options.color), outcome, docs, options)
}

pub fn write_outcome<W: WriteColor>(
    out: &mut W,
    outcome: &QueryOutcome,
    docs: Option<&DocStore>,
    options: OutputOptions,
) -> io::Result<()> {
    if !options.count_only {
        let shown = if options.limit == 0 {
            outcome.docs.len()
        } else {
            options.limit.min(outcome.docs.len())
        };
        for &doc_id in &outcome.docs[..shown] {
            out.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
            write!(out, "{:>8}", doc_id)?;
            out.reset()?;
            match docs.and_then(|d| d.name(doc_id)) {
                Some(name) => {
                    write!(out, "  ")?;
                    out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))?;
                    writeln!(out, "{}", name)?;
                    out.reset()?;
                }
                None => writeln!(out)?,
            }
        }
        if shown < outcome.docs.len() {
            writeln!(out, "... and {} more", outcome.docs.len() - shown)?;
        }
    }

    out.set_color(ColorSpec::new().set_bold(true))?;
    write!(out, "{} documents", outcome.docs.len())?;
    out.reset()?;
    writeln!(out, " ({:.3} ms)", outcome.elapsed.as_secs_f64() * 1000.0)?;
    Ok(())
}

/// Print dictionary entries, one per line, with their document frequency
pub fn print_terms(entries: &[(DictEntry, u32)], color: bool) -> io::Result<()> {
    write_terms(&mut stdout(color), entries)
}

pub fn write_terms<W: WriteColor>(out: &mut W, entries: &[(DictEntry, u32)]) -> io::Result<()> {
    for (entry, doc_frequency) in entries {
        write!(out, "{}", entry.term)?;
        out.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
        writeln!(out, "\t{}", doc_frequency)?;
        out.reset()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::types::PostingsRef;
    use std::time::Duration;
    use termcolor::NoColor;

    fn outcome(docs: Vec<u32>) -> QueryOutcome {
        QueryOutcome {
            docs,
            elapsed: Duration::from_micros(1500),
        }
    }

    fn render(outcome: &QueryOutcome, store: Option<&DocStore>, options: OutputOptions) -> String {
        let mut out = NoColor::new(Vec::new());
        write_outcome(&mut out, outcome, store, options).unwrap();
        String::from_utf8(out.into_inner()).unwrap()
    }

    #[test]
    fn test_outcome_with_names() {
        let store = DocStore::new(vec!["one.txt".into(), "two.txt".into()]);
        let text = render(&outcome(vec![1]), Some(&store), OutputOptions::default());
        assert_eq!(text, "       1  two.txt\n1 documents (1.500 ms)\n");
    }

    #[test]
    fn test_limit_and_count_only() {
        let options = OutputOptions {
            limit: 2,
            ..Default::default()
        };
        let text = render(&outcome(vec![0, 1, 2, 3]), None, options);
        assert!(text.contains("... and 2 more"));

        let options = OutputOptions {
            count_only: true,
            ..Default::default()
        };
        assert_eq!(
            render(&outcome(vec![0, 1]), None, options),
            "2 documents (1.500 ms)\n"
        );
    }

    #[test]
    fn test_terms_listing() {
        let mut out = NoColor::new(Vec::new());
        let entry = DictEntry {
            term: "fish".into(),
            postings: PostingsRef { offset: 0, length: 4 },
        };
        write_terms(&mut out, &[(entry, 2)]).unwrap();
        assert_eq!(String::from_utf8(out.into_inner()).unwrap(), "fish\t2\n");
    }
}
