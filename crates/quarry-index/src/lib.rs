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

//! Trigram index engine for the quarry code-search service.
//!
//! One index directory holds the complete, immutable artifact of a single
//! build: the file manifest, the content and file-name posting files, the raw
//! file bodies, and the excluded-files log. Regex search works by deriving a
//! required-trigram prefilter from the pattern, intersecting posting lists to
//! select candidate files, and confirming candidates with a full line-by-line
//! regex scan.

pub mod builder;
pub mod error;
pub mod refs;
pub mod regex_analyze;
mod search;
pub mod store;
pub mod trigram;
pub mod types;

pub use builder::build;
pub use error::IndexError;
pub use refs::{next_index_dir, scan_refs, FoundRefs, IndexRef};
pub use store::Index;
pub use types::{
    ExcludedFile, FileMatch, IndexOptions, Match, SearchOptions, SearchResponse,
};
