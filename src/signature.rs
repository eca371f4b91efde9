//! Signature specs: declarative descriptions of file headers
//!
//! A spec is an ordered list of `(offset, pattern)` entries. A header
//! matches when every entry matches:
//! - [`Pattern::Bytes`]: the exact bytes at `offset`
//! - [`Pattern::OneOf`]: any of several equally long byte strings at `offset`
//! - [`Pattern::Score`]: a pure predicate over the header; `offset` is the
//!   number of header bytes it may look at
//!
//! Every match carries a confidence, roughly 100 per literally matched byte,
//! which [`FormatDb`](crate::format_db::FormatDb) uses to rank overlapping
//! signatures.

use crate::error::{Error, Result};

/// Result of a scoring predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub matched: bool,
    /// Added to the spec's confidence on a match; must be positive
    pub confidence: u32,
}

impl Score {
    pub const NO: Score = Score {
        matched: false,
        confidence: 0,
    };

    /// Matches with `confidence` when `cond` holds
    pub const fn when(cond: bool, confidence: u32) -> Score {
        Score {
            matched: cond,
            confidence,
        }
    }
}

/// Scoring predicate over the header bytes
pub type ScoreFn = fn(&[u8]) -> Score;

/// One entry of a signature spec
#[derive(Clone, Copy)]
pub enum Pattern {
    Bytes(&'static [u8]),
    OneOf(&'static [&'static [u8]]),
    Score(ScoreFn),
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Bytes(b) => write!(f, "Bytes({:?})", String::from_utf8_lossy(b)),
            Pattern::OneOf(c) => write!(f, "OneOf({} choices)", c.len()),
            Pattern::Score(_) => f.write_str("Score(..)"),
        }
    }
}

/// A signature spec: `(offset, pattern)` entries in increasing offset order
pub type Spec = &'static [(usize, Pattern)];

/// Outcome of checking one spec against a header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched(i64),
    Mismatch,
    /// The header ended while everything seen so far still matched
    TooShort,
}

/// Choice counts above this are charged like this many
const LOG2_SUB_LIMIT: usize = 1083;

/// Confidence charged for a choice among `n` alternatives: 12.5 * log2(n)
fn log2_sub(n: usize) -> i64 {
    let n = n.min(LOG2_SUB_LIMIT);
    if n <= 1 {
        return 0;
    }
    (12.5 * (n as f64).log2()) as i64
}

/// Checks the structural rules of a spec and returns the number of header
/// bytes it inspects
///
/// Offsets may not go backwards past the end of the previous entry, patterns
/// must be non-empty, and choices must be unique and of uniform length.
pub fn validate_spec(spec: Spec, header_size_limit: usize) -> Result<usize> {
    if spec.is_empty() {
        return Err(Error::InvalidSpec("empty spec".into()));
    }
    let mut end = 0usize;
    let mut max_end = 0usize;
    for &(ofs, pattern) in spec {
        if ofs < end {
            return Err(Error::InvalidSpec(format!(
                "entry at offset {ofs} overlaps previous entry ending at {end}"
            )));
        }
        end = match pattern {
            Pattern::Bytes(bytes) => {
                if bytes.is_empty() {
                    return Err(Error::InvalidSpec("empty pattern string".into()));
                }
                ofs + bytes.len()
            }
            Pattern::OneOf(choices) => {
                let Some(first) = choices.first() else {
                    return Err(Error::InvalidSpec("empty pattern choice".into()));
                };
                if first.is_empty() {
                    return Err(Error::InvalidSpec("empty pattern choice item".into()));
                }
                if choices.iter().any(|c| c.len() != first.len()) {
                    return Err(Error::InvalidSpec(format!(
                        "non-uniform pattern choice sizes at offset {ofs}"
                    )));
                }
                for (i, c) in choices.iter().enumerate() {
                    if choices[..i].contains(c) {
                        return Err(Error::InvalidSpec(format!(
                            "duplicate pattern choice at offset {ofs}"
                        )));
                    }
                }
                ofs + first.len()
            }
            Pattern::Score(_) => ofs,
        };
        if end > header_size_limit {
            return Err(Error::InvalidSpec(format!(
                "spec inspects {end} bytes, limit is {header_size_limit}"
            )));
        }
        max_end = max_end.max(end);
    }
    Ok(max_end)
}

/// Computes the literal prefixes any header matching `spec` starts with
///
/// Leading literal and choice entries at consecutive offsets from 0 are
/// expanded into their cartesian product while it stays within
/// `count_limit`. A positive `max_prefix_size` truncates the prefixes. A
/// spec with no usable leading entry yields the single empty prefix.
pub fn spec_prefixes(spec: Spec, count_limit: usize, max_prefix_size: usize) -> Result<Vec<Vec<u8>>> {
    if count_limit < 1 {
        return Err(Error::InvalidSpec(format!("bad count_limit: {count_limit}")));
    }
    let mut prefixes: Vec<Vec<u8>> = vec![Vec::new()];
    if count_limit < 2 || spec.first().map(|e| e.0) != Some(0) {
        return Ok(prefixes);
    }
    let mut ofs = 0usize;
    for &(entry_ofs, pattern) in spec {
        let single;
        let choices: &[&[u8]] = match pattern {
            Pattern::Bytes(bytes) if entry_ofs == ofs => {
                single = [bytes];
                &single
            }
            Pattern::OneOf(choices) if entry_ofs == ofs => {
                if choices.is_empty() {
                    return Err(Error::InvalidSpec("empty pattern choice".into()));
                }
                choices
            }
            _ => break,
        };
        if prefixes.len() * choices.len() > count_limit {
            break;
        }
        let mut next = Vec::with_capacity(prefixes.len() * choices.len());
        for p in &prefixes {
            for c in choices {
                let mut joined = p.clone();
                joined.extend_from_slice(c);
                next.push(joined);
            }
        }
        prefixes = next;
        ofs += choices[0].len();
        if max_prefix_size > 0 && ofs >= max_prefix_size {
            for p in &mut prefixes {
                p.truncate(max_prefix_size);
            }
            break;
        }
    }
    Ok(prefixes)
}

/// True if `partial` could still be the start of one of `choices`
fn could_match(partial: &[u8], choices: &[&[u8]]) -> bool {
    choices.iter().any(|c| c.starts_with(partial))
}

/// Checks `spec` against `header` and computes the confidence of a match
///
/// Fails only if a scoring predicate reports a match with zero confidence.
pub fn check_spec(spec: Spec, header: &[u8]) -> Result<MatchOutcome> {
    let mut confidence = 0i64;
    let mut prev_end = 0usize;
    for &(ofs, pattern) in spec {
        match pattern {
            Pattern::Bytes(bytes) => {
                let single = [bytes];
                if let Some(outcome) = compare(header, ofs, &single) {
                    return Ok(outcome);
                }
                confidence += 100 * bytes.len() as i64 - distance_penalty(ofs, prev_end);
                prev_end = ofs + bytes.len();
            }
            Pattern::OneOf(choices) => {
                if let Some(outcome) = compare(header, ofs, choices) {
                    return Ok(outcome);
                }
                let len = choices.first().map_or(0, |c| c.len());
                confidence += 100 * len as i64
                    - log2_sub(choices.len())
                    - distance_penalty(ofs, prev_end);
                prev_end = ofs + len;
            }
            Pattern::Score(predicate) => {
                let score = predicate(header);
                if !score.matched {
                    return Ok(MatchOutcome::Mismatch);
                }
                if score.confidence == 0 {
                    return Err(Error::Internal(format!(
                        "scoring predicate at offset {ofs} matched with zero confidence"
                    )));
                }
                confidence += score.confidence as i64;
            }
        }
    }
    Ok(MatchOutcome::Matched(confidence))
}

fn distance_penalty(ofs: usize, prev_end: usize) -> i64 {
    10 * ofs.saturating_sub(prev_end).min(10) as i64
}

/// Compares a literal entry, returning an outcome only when it does not match
fn compare(header: &[u8], ofs: usize, choices: &[&[u8]]) -> Option<MatchOutcome> {
    let len = choices.first().map_or(0, |c| c.len());
    let end = ofs + len;
    if header.len() < end {
        let partial = header.get(ofs..).unwrap_or(&[]);
        return Some(if could_match(partial, choices) {
            MatchOutcome::TooShort
        } else {
            MatchOutcome::Mismatch
        });
    }
    let got = &header[ofs..end];
    if choices.iter().any(|c| *c == got) {
        None
    } else {
        Some(MatchOutcome::Mismatch)
    }
}

/// Checks alternative specs of one format: any match wins, then too-short
pub fn check_specs(specs: &[Spec], header: &[u8]) -> Result<MatchOutcome> {
    let mut best: Option<i64> = None;
    let mut too_short = false;
    for spec in specs {
        match check_spec(spec, header)? {
            MatchOutcome::Matched(c) => best = Some(best.map_or(c, |b| b.max(c))),
            MatchOutcome::TooShort => too_short = true,
            MatchOutcome::Mismatch => {}
        }
    }
    Ok(match best {
        Some(c) => MatchOutcome::Matched(c),
        None if too_short => MatchOutcome::TooShort,
        None => MatchOutcome::Mismatch,
    })
}
