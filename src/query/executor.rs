use crate::error::Result;
use crate::index::postings::PostingsCursor;
use crate::index::reader::IndexReader;
use crate::index::types::{DocId, Position};
use crate::query::algebra;
use crate::query::parser::{QueryNode, parse_query};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Documents matching one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    /// Ascending doc ids
    pub docs: Vec<DocId>,
    /// Wall-clock evaluation time
    pub elapsed: Duration,
}

/// Evaluates query trees against a shared index
#[derive(Clone)]
pub struct QueryEngine {
    reader: Arc<IndexReader>,
}

impl QueryEngine {
    pub fn new(reader: Arc<IndexReader>) -> Self {
        Self { reader }
    }

    pub fn reader(&self) -> &IndexReader {
        &self.reader
    }

    /// Parse and evaluate `query`. Nothing is evaluated if it does not parse.
    pub fn execute(&self, query: &str) -> Result<QueryOutcome> {
        let node = parse_query(query)?;
        self.execute_node(&node)
    }

    pub fn execute_node(&self, node: &QueryNode) -> Result<QueryOutcome> {
        let started = Instant::now();
        let docs = self.evaluate(node)?;
        let elapsed = started.elapsed();
        debug!(matches = docs.len(), elapsed_us = elapsed.as_micros() as u64, "query evaluated");
        Ok(QueryOutcome { docs, elapsed })
    }

    /// Sorted doc ids matching `node`
    pub fn evaluate(&self, node: &QueryNode) -> Result<Vec<DocId>> {
        match node {
            QueryNode::Term(term) => self.term_docs(term),
            QueryNode::And(operands) => self.conjunction(operands),
            QueryNode::Or(operands) => {
                let mut docs = Vec::new();
                for operand in operands {
                    docs = algebra::union(&docs, &self.evaluate(operand)?);
                }
                Ok(docs)
            }
            QueryNode::Not(inner) => Ok(algebra::complement(
                &self.evaluate(inner)?,
                self.reader.doc_count(),
            )),
            QueryNode::Difference(left, right) => Ok(algebra::difference(
                &self.evaluate(left)?,
                &self.evaluate(right)?,
            )),
            QueryNode::Proximity {
                left,
                right,
                radius,
            } => self.positional(&[left.as_str(), right.as_str()], |lists| {
                algebra::within(&lists[0], &lists[1], *radius)
            }),
            QueryNode::Ordered(terms) => self.positional(&as_strs(terms), algebra::in_order),
            QueryNode::Phrase(terms) => self.positional(&as_strs(terms), algebra::adjacent),
        }
    }

    fn term_docs(&self, term: &str) -> Result<Vec<DocId>> {
        match self.reader.lookup(term)? {
            Some(found) => Ok(self.reader.postings(&found)?.collect_docs()?),
            None => Ok(Vec::new()),
        }
    }

    /// Cursors for `terms`, rarest first; `None` when any term is absent
    fn cursors(&self, terms: &[&str]) -> Result<Option<Vec<(usize, PostingsCursor<'_>)>>> {
        let mut found = Vec::with_capacity(terms.len());
        for (slot, term) in terms.iter().enumerate() {
            match self.reader.lookup(term)? {
                Some(postings) => found.push((slot, postings)),
                None => return Ok(None),
            }
        }
        found.sort_by_key(|(_, p)| p.doc_frequency);
        let mut cursors = Vec::with_capacity(found.len());
        for (slot, postings) in found {
            cursors.push((slot, self.reader.postings(&postings)?));
        }
        Ok(Some(cursors))
    }

    /// AND: term operands are intersected through their cursors so skip
    /// pointers apply; other operands are evaluated and intersected first
    fn conjunction(&self, operands: &[QueryNode]) -> Result<Vec<DocId>> {
        let mut terms = Vec::new();
        let mut filter: Option<Vec<DocId>> = None;
        for operand in operands {
            match operand {
                QueryNode::Term(term) => terms.push(term.as_str()),
                other => {
                    let docs = self.evaluate(other)?;
                    filter = Some(match filter {
                        Some(prev) => algebra::intersect(&prev, &docs),
                        None => docs,
                    });
                }
            }
            if filter.as_ref().is_some_and(|f| f.is_empty()) {
                return Ok(Vec::new());
            }
        }

        if terms.is_empty() {
            return Ok(filter.unwrap_or_default());
        }
        let Some(mut cursors) = self.cursors(&terms)? else {
            return Ok(Vec::new());
        };
        match filter {
            Some(candidates) => filter_by_cursors(&candidates, &mut cursors, |_| Ok(true)),
            None => leapfrog(&mut cursors, |_| Ok(true)),
        }
    }

    /// Documents containing every term whose position lists satisfy `accept`.
    /// Lists are passed in the order of `terms`.
    fn positional<F>(&self, terms: &[&str], accept: F) -> Result<Vec<DocId>>
    where
        F: Fn(&[Vec<Position>]) -> bool,
    {
        let Some(mut cursors) = self.cursors(terms)? else {
            return Ok(Vec::new());
        };
        let mut lists = vec![Vec::new(); terms.len()];
        leapfrog(&mut cursors, |cursors| {
            for (slot, cursor) in cursors.iter() {
                lists[*slot] = cursor.positions()?;
            }
            Ok(accept(&lists))
        })
    }
}

fn as_strs(terms: &[String]) -> Vec<&str> {
    terms.iter().map(String::as_str).collect()
}

type Cursors<'a> = [(usize, PostingsCursor<'a>)];

/// Leapfrog join: every cursor is sought to the largest current doc until
/// all agree, then `accept` decides whether the doc matches
fn leapfrog<F>(cursors: &mut Cursors<'_>, mut accept: F) -> Result<Vec<DocId>>
where
    F: FnMut(&Cursors<'_>) -> Result<bool>,
{
    let mut out = Vec::new();
    let Some((_, lead)) = cursors.first_mut() else {
        return Ok(out);
    };
    let Some(mut target) = lead.advance()? else {
        return Ok(out);
    };

    'search: loop {
        let mut agreed = true;
        for (_, cursor) in cursors.iter_mut() {
            match cursor.seek(target)? {
                None => break 'search,
                Some(doc) if doc > target => {
                    target = doc;
                    agreed = false;
                    break;
                }
                Some(_) => {}
            }
        }
        if agreed {
            if accept(cursors)? {
                out.push(target);
            }
            match cursors[0].1.advance()? {
                Some(doc) => target = doc,
                None => break,
            }
        }
    }
    Ok(out)
}

/// Keep the candidates every cursor contains
fn filter_by_cursors<F>(
    candidates: &[DocId],
    cursors: &mut Cursors<'_>,
    mut accept: F,
) -> Result<Vec<DocId>>
where
    F: FnMut(&Cursors<'_>) -> Result<bool>,
{
    let mut out = Vec::new();
    'candidates: for &doc in candidates {
        for (_, cursor) in cursors.iter_mut() {
            match cursor.seek(doc)? {
                None => break 'candidates,
                Some(found) if found != doc => continue 'candidates,
                Some(_) => {}
            }
        }
        if accept(cursors)? {
            out.push(doc);
        }
    }
    Ok(out)
}
