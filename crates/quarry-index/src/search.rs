//! Regex search against one open index: prefilter-driven candidate
//! selection, file-path filtering, then a confirming line scan.

use regex::{Regex, RegexBuilder};

use crate::error::IndexError;
use crate::regex_analyze::{prefilter_from_pattern, Prefilter};
use crate::store::Postings;
use crate::trigram::case_variants;
use crate::types::{FileMatch, Match, SearchOptions, SearchResponse};
use crate::Index;

impl Index {
    /// Run `pattern` against this index. `vsel` is the sorted list of virtual
    /// repository selectors; it only applies to hidden indexes, where a
    /// nonempty list restricts the scan to the selected subtrees.
    pub fn search(
        &self,
        pattern: &str,
        opt: &SearchOptions,
        vsel: &[String],
    ) -> Result<SearchResponse, IndexError> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(opt.ignore_case)
            .build()
            .map_err(|e| IndexError::BadRegex(e.to_string()))?;

        let mut candidates = self.candidates(pattern, opt.ignore_case);

        let file_re = if opt.file_regexp.is_empty() {
            None
        } else {
            // The name index narrows candidates; the compiled filter is
            // still the authority on each surviving path.
            if let Prefilter::Conj(tris) = prefilter_from_pattern(&opt.file_regexp) {
                if let Some(by_name) = eval_conj(self.names(), &tris, false) {
                    candidates = intersect_sorted(&candidates, &by_name);
                }
            }
            Some(
                Regex::new(&opt.file_regexp)
                    .map_err(|e| IndexError::BadRegex(e.to_string()))?,
            )
        };

        let hidden = self.manifest().hidden;
        let file_repo = self.manifest().file_repo.clone();
        let ctx = opt.lines_of_context;

        let mut resp = SearchResponse {
            revision: self.rev().to_string(),
            ..Default::default()
        };
        let mut files_found = 0usize;
        let mut files_collected = 0usize;

        for doc in candidates {
            let Some(entry) = self.manifest().files.get(doc as usize) else {
                continue;
            };
            if let Some(fre) = &file_re {
                if !fre.is_match(&entry.path) {
                    continue;
                }
            }

            let vname = if hidden {
                virtual_name(&file_repo, &entry.path)
            } else {
                None
            };
            if hidden && !vsel.is_empty() {
                match &vname {
                    Some(v) if vsel.binary_search(v).is_ok() => {}
                    _ => continue,
                }
            }

            let Some(body) = self.content_of(entry) else {
                return Err(IndexError::Corrupt(format!(
                    "content store does not cover {}",
                    entry.path
                )));
            };
            resp.files_opened += 1;

            let lines: Vec<&str> = body.lines().collect();
            let mut matches = Vec::new();
            for (i, line) in lines.iter().enumerate() {
                if !re.is_match(line) {
                    continue;
                }
                let before = lines[i.saturating_sub(ctx)..i]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                let after = lines[i + 1..(i + 1 + ctx).min(lines.len())]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                matches.push(Match {
                    line: line.to_string(),
                    line_number: i + 1,
                    before,
                    after,
                });
            }
            if matches.is_empty() {
                continue;
            }

            files_found += 1;
            if opt.offset > 0 && files_found <= opt.offset {
                continue;
            }

            let fm = FileMatch {
                filename: entry.path.clone(),
                matches,
            };
            match vname {
                Some(v) => {
                    resp.vmatches.entry(v.clone()).or_default().push(fm);
                    *resp.vfiles_with_match.entry(v.clone()).or_insert(0) += 1;
                    resp.vrevision
                        .entry(v)
                        .or_insert_with(|| virtual_rev(&entry.path));
                }
                None => {
                    resp.matches.push(fm);
                    resp.files_with_match += 1;
                }
            }
            files_collected += 1;
            if opt.limit > 0 && files_collected >= opt.limit {
                break;
            }
        }

        Ok(resp)
    }

    /// Candidate file IDs for `pattern`, ascending. With no derivable
    /// prefilter the whole manifest is the candidate set.
    fn candidates(&self, pattern: &str, ignore_case: bool) -> Vec<u32> {
        match prefilter_from_pattern(pattern) {
            Prefilter::None => (0..self.file_count() as u32).collect(),
            Prefilter::Conj(tris) => {
                eval_conj(self.postings(), &tris, ignore_case).unwrap_or_default()
            }
            Prefilter::Disj(branches) => {
                let mut out: Vec<u32> = Vec::new();
                for tris in branches {
                    if let Some(docs) = eval_conj(self.postings(), &tris, ignore_case) {
                        out.extend(docs);
                    }
                }
                out.sort_unstable();
                out.dedup();
                out
            }
        }
    }
}

/// Intersect the posting lists of every trigram in the conjunction. None when
/// some required trigram is absent from the corpus.
fn eval_conj(postings: &Postings, tris: &[[u8; 3]], ignore_case: bool) -> Option<Vec<u32>> {
    let mut acc: Option<Vec<u32>> = None;
    for tri in tris {
        let docs = if ignore_case {
            let mut merged: Vec<u32> = Vec::new();
            for v in case_variants(*tri) {
                if let Some(d) = postings.docs(&v) {
                    merged.extend(d);
                }
            }
            merged.sort_unstable();
            merged.dedup();
            merged
        } else {
            postings.docs(tri).unwrap_or_default()
        };
        if docs.is_empty() {
            return None;
        }
        acc = Some(match acc {
            None => docs,
            Some(prev) => intersect_sorted(&prev, &docs),
        });
        if acc.as_ref().map(|v| v.is_empty()).unwrap_or(false) {
            return None;
        }
    }
    acc
}

fn intersect_sorted(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut i = 0;
    let mut j = 0;
    let mut out = Vec::new();
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            out.push(a[i]);
            i += 1;
            j += 1;
        } else if a[i] < b[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Virtual repository of a file inside a hidden index. Paths follow the
/// `<org>/<branch>/...` layout; anything shallower stays non-virtual.
fn virtual_name(file_repo: &str, path: &str) -> Option<String> {
    let mut parts = path.splitn(3, '/');
    let org = parts.next()?;
    parts.next()?;
    parts.next()?;
    Some(format!("{}/{}", file_repo, org))
}

fn virtual_rev(path: &str) -> String {
    path.split('/').nth(1).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_sorted_basic() {
        assert_eq!(intersect_sorted(&[1, 3, 5, 7], &[3, 4, 5]), vec![3, 5]);
        assert!(intersect_sorted(&[], &[1]).is_empty());
    }

    #[test]
    fn virtual_names_require_three_components() {
        assert_eq!(
            virtual_name("data", "proj1/main/src/a.go").as_deref(),
            Some("data/proj1")
        );
        assert_eq!(virtual_rev("proj1/main/src/a.go"), "main");
        assert_eq!(virtual_name("data", "README.md"), None);
        assert_eq!(virtual_name("data", "proj1/main"), None);
    }
}
