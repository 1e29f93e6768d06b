//! Derive a required-trigram prefilter from a regex pattern.
//!
//! The prefilter is a boolean expression over trigrams that is *necessarily*
//! satisfied by any text the regex matches, so posting-list intersection can
//! narrow the candidate file set before the full scan. When no such
//! expression can be derived the index cannot prune and every file becomes a
//! candidate.

use regex_syntax::hir::{Class, Hir, HirKind};
use std::collections::BTreeSet;

use crate::trigram::emit_trigrams;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prefilter {
    /// Trigrams that every match must contain, all of them.
    Conj(Vec<[u8; 3]>),
    /// One conjunction per top-level alternation branch; a match satisfies
    /// at least one branch.
    Disj(Vec<Vec<[u8; 3]>>),
    /// No safe derivation; every file is a candidate.
    None,
}

/// Analyze `pattern` and return the strongest prefilter that is still
/// necessary for every match.
pub fn prefilter_from_pattern(pattern: &str) -> Prefilter {
    let hir = match regex_syntax::Parser::new().parse(pattern) {
        Ok(h) => h,
        Err(_) => return Prefilter::None,
    };

    if let HirKind::Alternation(branches) = hir.kind() {
        let mut disj = Vec::with_capacity(branches.len());
        for branch in branches {
            let tris = trigram_conj(&required_runs(branch));
            if tris.is_empty() {
                // An unconstrained branch can match anything, so no pruning
                // across the whole alternation is sound.
                return Prefilter::None;
            }
            disj.push(tris);
        }
        return Prefilter::Disj(disj);
    }

    let tris = trigram_conj(&required_runs(&hir));
    if tris.is_empty() {
        Prefilter::None
    } else {
        Prefilter::Conj(tris)
    }
}

/// Collect literal byte runs that every match of `h` must contain. Runs
/// shorter than three bytes produce no trigrams and are dropped later.
fn required_runs(h: &Hir) -> Vec<Vec<u8>> {
    match h.kind() {
        HirKind::Literal(lit) => vec![lit.0.to_vec()],
        HirKind::Concat(list) => {
            let mut out: Vec<Vec<u8>> = Vec::new();
            let mut cur: Vec<u8> = Vec::new();
            for sub in list {
                match sub.kind() {
                    HirKind::Literal(lit) => cur.extend_from_slice(&lit.0),
                    HirKind::Class(class) => {
                        if let Some(b) = singleton_byte(class) {
                            cur.push(b);
                        } else {
                            flush_run(&mut cur, &mut out);
                        }
                    }
                    _ => {
                        flush_run(&mut cur, &mut out);
                        // A mandatory sub-expression still contributes its
                        // own required runs.
                        out.extend(required_runs(sub));
                    }
                }
            }
            flush_run(&mut cur, &mut out);
            out
        }
        HirKind::Alternation(list) => {
            // Only runs common to every branch are required.
            let mut common: Option<BTreeSet<Vec<u8>>> = None;
            for sub in list {
                let set: BTreeSet<Vec<u8>> = required_runs(sub).into_iter().collect();
                common = Some(match common {
                    None => set,
                    Some(prev) => prev.intersection(&set).cloned().collect(),
                });
            }
            common.map(|s| s.into_iter().collect()).unwrap_or_default()
        }
        HirKind::Repetition(rep) if rep.min >= 1 => required_runs(&rep.sub),
        HirKind::Capture(cap) => required_runs(&cap.sub),
        _ => Vec::new(),
    }
}

fn flush_run(cur: &mut Vec<u8>, out: &mut Vec<Vec<u8>>) {
    if cur.len() >= 3 {
        out.push(std::mem::take(cur));
    } else {
        cur.clear();
    }
}

/// A class that admits exactly one ASCII byte acts as a literal.
fn singleton_byte(class: &Class) -> Option<u8> {
    match class {
        Class::Bytes(cb) => {
            let mut it = cb.iter();
            let r = it.next()?;
            if it.next().is_none() && r.start() == r.end() {
                Some(r.start())
            } else {
                None
            }
        }
        Class::Unicode(cu) => {
            let mut it = cu.iter();
            let r = it.next()?;
            if it.next().is_none() && r.start() == r.end() && (r.start() as u32) < 128 {
                Some(r.start() as u8)
            } else {
                None
            }
        }
    }
}

fn trigram_conj(runs: &[Vec<u8>]) -> Vec<[u8; 3]> {
    let mut tris = Vec::new();
    for run in runs {
        emit_trigrams(run, &mut tris);
    }
    tris.sort_unstable();
    tris.dedup();
    tris
}
