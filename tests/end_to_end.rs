//! End-to-end tests: build real index files and query them through the
//! library API and the `lexdex` binary.

use lexdex::config::BuildConfig;
use lexdex::error::LexdexError;
use lexdex::index::writer::IndexHeader;
use lexdex::index::{Corpus, DocId, IndexBuilder, IndexReader};
use lexdex::query::QueryEngine;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

fn build(texts: &[(&str, &str)], config: BuildConfig) -> (TempDir, QueryEngine) {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("corpus.idx");
    let corpus = Corpus::from_texts(texts.iter().map(|(n, t)| (n.to_string(), t.to_string())));
    let report = IndexBuilder::new(config).unwrap().build(&corpus, &output).unwrap();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    let reader = IndexReader::open(&output).unwrap();
    (dir, QueryEngine::new(Arc::new(reader)))
}

fn small_config() -> BuildConfig {
    BuildConfig {
        workers: 2,
        skip_interval: 2,
        restart_interval: 3,
        ..Default::default()
    }
}

fn run(engine: &QueryEngine, query: &str) -> Vec<DocId> {
    engine
        .execute(query)
        .unwrap_or_else(|e| panic!("{}: {}", query, e))
        .docs
}

const FAMILY: &[(&str, &str)] = &[
    ("doc1", "heaven and hell"),
    ("doc2", "father and brother"),
    ("doc3", "father and sister"),
];

#[test]
fn test_family_scenario() {
    let (_dir, engine) = build(FAMILY, small_config());
    assert_eq!(run(&engine, "father & (brother | sister)"), vec![1, 2]);
    assert!(run(&engine, "heaven & !hell").is_empty());
    assert_eq!(run(&engine, "and"), vec![0, 1, 2]);
    assert_eq!(run(&engine, "FATHER"), vec![1, 2]);
}

#[test]
fn test_phrase_ordered_and_proximity() {
    let docs = [("adjacent", "a b"), ("gapped", "a x b"), ("reversed", "b a")];
    let (_dir, engine) = build(&docs, small_config());

    assert_eq!(run(&engine, "\"a b\""), vec![0]);
    assert_eq!(run(&engine, "a > b"), vec![0, 1]);
    assert_eq!(run(&engine, "a {2} b"), vec![0, 1, 2]);

    // A phrase is the ordered match restricted to adjacent positions
    let ordered = run(&engine, "a > b");
    let phrase = run(&engine, "\"a b\"");
    assert!(phrase.iter().all(|d| ordered.contains(d)));
}

#[test]
fn test_proximity_boundary() {
    let docs = [("greeting", "hello big wide world")];
    let (_dir, engine) = build(&docs, small_config());
    assert_eq!(run(&engine, "hello {3} world"), vec![0]);
    assert_eq!(run(&engine, "hello {4} world"), vec![0]);
    assert!(run(&engine, "hello {2} world").is_empty());
    assert_eq!(run(&engine, "world {3} hello"), vec![0]);
}

#[test]
fn test_chained_order_needs_one_increasing_sequence() {
    let docs = [("pairwise", "b c a b"), ("sequence", "a b c")];
    let (_dir, engine) = build(&docs, small_config());
    // "pairwise" has a before b and b before c, but no a < b < c
    assert_eq!(run(&engine, "a > b > c"), vec![1]);
    assert_eq!(run(&engine, "a > b"), vec![0, 1]);
}

#[test]
fn test_boolean_algebra() {
    let texts: Vec<(String, String)> = (0..60)
        .map(|i| {
            let mut text = String::from("filler");
            if i % 2 == 0 {
                text.push_str(" alpha");
            }
            if i % 3 == 0 {
                text.push_str(" beta");
            }
            (format!("d{}", i), text)
        })
        .collect();
    let refs: Vec<(&str, &str)> = texts.iter().map(|(n, t)| (n.as_str(), t.as_str())).collect();
    let (_dir, engine) = build(&refs, small_config());

    let and = run(&engine, "alpha & beta");
    let or = run(&engine, "alpha | beta");
    assert!(and.iter().all(|d| or.contains(d)));
    assert_eq!(and, (0..60).filter(|i| i % 6 == 0).collect::<Vec<_>>());

    assert_eq!(run(&engine, "!!alpha"), run(&engine, "alpha"));
    assert_eq!(run(&engine, "!(alpha & beta)"), run(&engine, "!alpha | !beta"));
    assert_eq!(run(&engine, "!(alpha | beta)"), run(&engine, "!alpha & !beta"));
    assert_eq!(run(&engine, "alpha \\ beta"), run(&engine, "alpha & !beta"));
    assert_eq!(run(&engine, "!missing").len(), 60);
}

#[test]
fn test_dictionary_integrity() {
    let (dir, _engine) = build(FAMILY, small_config());
    let reader = IndexReader::open(&dir.path().join("corpus.idx")).unwrap();

    let terms: Vec<String> = reader
        .terms()
        .unwrap()
        .map(|entry| entry.unwrap().term)
        .collect();
    assert_eq!(
        terms,
        vec!["and", "brother", "father", "heaven", "hell", "sister"]
    );
    assert_eq!(reader.term_count(), terms.len() as u64);
    for term in &terms {
        let found = reader.lookup(term).unwrap();
        assert!(found.is_some(), "{} not found", term);
    }
    assert!(reader.lookup("hel").unwrap().is_none());
    assert!(reader.lookup("zebra").unwrap().is_none());

    let prefixed: Vec<String> = reader
        .terms_with_prefix("he")
        .unwrap()
        .into_iter()
        .map(|e| e.term)
        .collect();
    assert_eq!(prefixed, vec!["heaven", "hell"]);
}

#[test]
fn test_failed_query_leaves_index_usable() {
    let (_dir, engine) = build(FAMILY, small_config());
    let err = engine.execute("father & (brother").unwrap_err();
    assert!(err.to_string().contains("offset"));
    assert_eq!(run(&engine, "father"), vec![1, 2]);
}

/// Build a one-document index over `text` and return its path
fn build_file(dir: &Path, text: &str) -> std::path::PathBuf {
    let output = dir.join("one.idx");
    let corpus = Corpus::from_texts([("only", text)]);
    IndexBuilder::new(small_config()).unwrap().build(&corpus, &output).unwrap();
    output
}

fn query_file(path: &Path, query: &str) -> lexdex::error::Result<Vec<DocId>> {
    let reader = IndexReader::open(path)?;
    Ok(QueryEngine::new(Arc::new(reader)).execute(query)?.docs)
}

#[test]
fn test_corrupt_postings_fail_the_query() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_file(dir.path(), "solo");
    assert_eq!(query_file(&path, "solo").unwrap(), vec![0]);

    let mut bytes = fs::read(&path).unwrap();
    let header = IndexHeader::parse(&bytes).unwrap();
    let found = IndexReader::open(&path).unwrap().lookup("solo").unwrap().unwrap();
    // Claim five documents in a block that encodes one
    let at = (header.postings_offset + found.postings.offset) as usize;
    assert_eq!(bytes[at], 1);
    bytes[at] = 5;
    fs::write(&path, &bytes).unwrap();

    for query in ["solo", "!solo", "solo | missing"] {
        assert!(
            matches!(query_file(&path, query), Err(LexdexError::CorruptIndex(_))),
            "{}",
            query
        );
    }
    assert!(query_file(&path, "missing").unwrap().is_empty());
}

#[test]
fn test_corrupt_dictionary_fails_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_file(dir.path(), "solo");

    let mut bytes = fs::read(&path).unwrap();
    let header = IndexHeader::parse(&bytes).unwrap();
    // Turn the first entry's shared-prefix length into an unterminated varint
    bytes[header.dictionary_offset as usize] = 0x80;
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        query_file(&path, "solo"),
        Err(LexdexError::CorruptIndex(_))
    ));
}

fn write_corpus(root: &Path) {
    let corpus = root.join("corpus");
    fs::create_dir_all(&corpus).unwrap();
    for (name, text) in FAMILY {
        fs::write(corpus.join(format!("{}.txt", name)), text).unwrap();
    }
}

fn lexdex(args: &[&str], dir: &Path) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_lexdex"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run lexdex");
    (
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
        output.status.success(),
    )
}

#[test]
fn test_cli_index_and_query() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path());

    let (stdout, stderr, ok) = lexdex(&["index", "corpus", "-o", "family.idx", "--quiet"], dir.path());
    assert!(ok, "{}", stderr);
    assert!(stdout.contains("Indexing 3 documents"));

    let (stdout, stderr, ok) = lexdex(
        &["query", "--no-color", "family.idx", "father & (brother | sister)"],
        dir.path(),
    );
    assert!(ok, "{}", stderr);
    assert!(stdout.contains("doc2.txt"));
    assert!(stdout.contains("doc3.txt"));
    assert!(!stdout.contains("doc1.txt"));
    assert!(stdout.contains("2 documents"));

    let (stdout, _, ok) = lexdex(&["query", "--count", "family.idx", "heaven & !hell"], dir.path());
    assert!(ok);
    assert!(stdout.starts_with("0 documents"));

    let (stdout, _, ok) = lexdex(&["terms", "family.idx", "--prefix", "he"], dir.path());
    assert!(ok);
    assert_eq!(stdout, "heaven\t1\nhell\t1\n");
}

#[test]
fn test_cli_reports_syntax_error_position() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path());
    let (_, stderr, ok) = lexdex(&["index", "corpus", "-o", "family.idx", "-q"], dir.path());
    assert!(ok, "{}", stderr);

    let (_, stderr, ok) = lexdex(&["query", "family.idx", "father &"], dir.path());
    assert!(!ok);
    assert!(stderr.contains("syntax error at offset 8"), "{}", stderr);
}
