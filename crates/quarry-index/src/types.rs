// Copyright 2025 Quarry Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hard limit on the size of an indexable file.
pub const MAX_FILE_SIZE: u64 = 1 << 20;

/// Files with any line longer than this are treated as machine-generated and
/// skipped.
pub const MAX_LINE_LEN: usize = 2000;

/// A file whose control-byte ratio reaches this threshold is considered
/// binary.
pub const MAX_CONTROL_RATIO: f64 = 0.25;

/// Options controlling which files an index build admits.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub exclude_dot_files: bool,
    /// VCS metadata directory names to skip during the walk.
    pub special_files: Vec<String>,
    /// Hidden repositories index one tree but answer queries per virtual
    /// repository (see [`SearchResponse::vmatches`]).
    pub hidden: bool,
}

/// One file admitted into the index. `offset`/`len` address the body inside
/// the raw content store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub sha1: String,
    pub offset: u64,
    pub len: u64,
}

/// One file rejected during a build, with the reason it was skipped. The
/// field names are the wire format of the excluded-files log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludedFile {
    #[serde(rename = "Filename")]
    pub filename: String,
    #[serde(rename = "Reason")]
    pub reason: String,
}

/// Manifest header plus the ordered file table for one index directory.
///
/// The manifest is written last during a build: a directory without a
/// readable manifest is invalid and subject to the unclaim sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub url: String,
    pub rev: String,
    pub built_at_ms: u64,
    pub version: u32,
    #[serde(default)]
    pub hidden: bool,
    /// Basename of the indexed tree; prefixes virtual repository names.
    #[serde(default)]
    pub file_repo: String,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub ignore_case: bool,
    pub lines_of_context: usize,
    /// Optional regex over relative file paths; empty means no filter.
    pub file_regexp: String,
    /// Number of matching files to skip.
    pub offset: usize,
    /// Maximum number of matching files to return; 0 means unbounded.
    pub limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            ignore_case: false,
            lines_of_context: 2,
            file_regexp: String::new(),
            offset: 0,
            limit: 0,
        }
    }
}

/// One matching line with its capped context.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    #[serde(rename = "Line")]
    pub line: String,
    #[serde(rename = "LineNumber")]
    pub line_number: usize,
    #[serde(rename = "Before")]
    pub before: Vec<String>,
    #[serde(rename = "After")]
    pub after: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileMatch {
    #[serde(rename = "Filename")]
    pub filename: String,
    #[serde(rename = "Matches")]
    pub matches: Vec<Match>,
}

/// Result of one search against one index. Field names follow the HTTP API
/// wire format.
#[derive(Debug, Default, Serialize)]
pub struct SearchResponse {
    #[serde(rename = "Matches")]
    pub matches: Vec<FileMatch>,
    #[serde(rename = "FilesWithMatch")]
    pub files_with_match: usize,
    #[serde(rename = "FilesOpened")]
    pub files_opened: usize,
    #[serde(rename = "Revision")]
    pub revision: String,
    /// Hidden-repo results sharded per virtual repository. Consumed by the
    /// dispatcher, never serialized directly.
    #[serde(skip)]
    pub vmatches: BTreeMap<String, Vec<FileMatch>>,
    #[serde(skip)]
    pub vfiles_with_match: BTreeMap<String, usize>,
    #[serde(skip)]
    pub vrevision: BTreeMap<String, String>,
}
