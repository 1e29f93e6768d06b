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

//! HTTP API: repository listing, parallel fan-out search, excluded-files
//! reporting, and on-demand update triggers.
//!
//! Search-path errors are returned as HTTP 200 with an `Error` body; the UI
//! depends on that, so callers must treat the presence of an `Error` field as
//! failure regardless of status code. Structural errors (unknown repo, push
//! disabled, wrong method) use real status codes.

use axum::extract::{Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{any, get};
use axum::Router;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use quarry_index::{SearchOptions, SearchResponse};

use crate::coordinator::{Live, SearcherMap};

const DEFAULT_LINES_OF_CONTEXT: usize = 2;
const MAX_LINES_OF_CONTEXT: usize = 20;
/// Per-repo file limit applied when a query fans out to several repos.
const DEFAULT_FILES_OPENED: usize = 5;

const INDEX_HTML: &str = include_str!("../static/index.html");

#[derive(Clone)]
pub struct AppState {
    pub live: Live,
    pub dev: bool,
}

pub fn router(live: Live, dev: bool) -> Router {
    Router::new()
        .route("/", get(ui_handler))
        .route("/healthz", get(health_handler))
        .route("/api/v1/repos", get(repos_handler))
        .route("/api/v1/search", get(search_handler))
        .route("/api/v1/excludes", get(excludes_handler))
        .route("/api/v1/update", any(update_handler))
        .with_state(AppState { live, dev })
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn ui_handler(State(state): State<AppState>) -> Html<String> {
    if state.dev {
        let dev_path = concat!(env!("CARGO_MANIFEST_DIR"), "/static/index.html");
        if let Ok(s) = std::fs::read_to_string(dev_path) {
            return Html(s);
        }
    }
    Html(INDEX_HTML.to_string())
}

fn error_json(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(json!({ "Error": msg.into() }))).into_response()
}

/// Until the coordinator publishes the live map every endpoint answers with
/// a 200 "not ready" error body.
fn check_ready(live: &Live) -> Option<Response> {
    if live.is_ready() {
        None
    } else {
        Some(error_json(
            StatusCode::OK,
            "Server is not ready, please wait...",
        ))
    }
}

async fn repos_handler(
    State(state): State<AppState>,
    Query(_params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(resp) = check_ready(&state.live) {
        return resp;
    }
    let searchers = state.live.snapshot();
    let mut res = serde_json::Map::new();
    for (name, s) in &searchers {
        if s.is_hidden() {
            for v in s.vrepos() {
                res.insert(
                    v.clone(),
                    json!({
                        "url-pattern": s.repo().url_pattern,
                        "revision": s.vrepo_rev(&v),
                    }),
                );
            }
        } else {
            let mut obj = serde_json::to_value(s.repo()).unwrap_or_else(|_| json!({}));
            obj["revision"] = json!(s.revision());
            res.insert(name.clone(), obj);
        }
    }
    Json(serde_json::Value::Object(res)).into_response()
}

async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(resp) = check_ready(&state.live) {
        return resp;
    }
    let searchers = state.live.snapshot();

    let query = param(&params, "q").trim().to_string();
    if query.is_empty() {
        return error_json(StatusCode::OK, "No query");
    }
    let stats = parse_as_bool(param(&params, "stats"));
    let (repos, vrepos) = parse_repo_list(param(&params, "repos"), &searchers);
    let (offset, mut limit) = parse_range(param(&params, "rng"));
    if repos.len() > 1 {
        limit = DEFAULT_FILES_OPENED;
    }
    let opt = SearchOptions {
        ignore_case: parse_as_bool(param(&params, "i")),
        file_regexp: param(&params, "files").to_string(),
        lines_of_context: parse_as_uint(
            param(&params, "ctx"),
            0,
            MAX_LINES_OF_CONTEXT,
            DEFAULT_LINES_OF_CONTEXT,
        ),
        offset,
        limit,
    };

    match search_all(query, opt, repos, Arc::new(vrepos), &searchers).await {
        Err(msg) => error_json(StatusCode::OK, msg),
        Ok((results, files_opened, duration_ms)) => {
            let mut body = json!({ "Results": results });
            if stats {
                body["Stats"] = json!({
                    "FilesOpened": files_opened,
                    "Duration": duration_ms,
                });
            }
            Json(body).into_response()
        }
    }
}

async fn excludes_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(resp) = check_ready(&state.live) {
        return resp;
    }
    let searchers = state.live.snapshot();
    let repo = param(&params, "repo");
    let mut res = "[]".to_string();
    if let Some(s) = searchers.get(repo) {
        res = s.excluded_files("");
    } else {
        // A virtual name selects the hidden searcher that contains it.
        for s in searchers.values() {
            if s.is_hidden() && s.has_vrepo(repo) {
                res = s.excluded_files(repo);
                break;
            }
        }
    }
    (
        [(header::CONTENT_TYPE, "application/json;charset=utf-8")],
        res,
    )
        .into_response()
}

async fn method_not_allowed() -> Response {
    error_json(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
}

async fn update_handler(
    method: Method,
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if method != Method::POST {
        return method_not_allowed().await;
    }
    if let Some(resp) = check_ready(&state.live) {
        return resp;
    }
    let searchers = state.live.snapshot();
    let list = param(&params, "repos").trim();
    let names: Vec<String> = if list.is_empty() || list == "*" {
        searchers.keys().cloned().collect()
    } else {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    };
    for name in &names {
        let Some(s) = searchers.get(name) else {
            return error_json(
                StatusCode::NOT_FOUND,
                format!("No such repository: {}", name),
            );
        };
        if !s.update() {
            return error_json(
                StatusCode::FORBIDDEN,
                format!("Push updates are not enabled for repository {}", name),
            );
        }
    }
    Json(json!("ok")).into_response()
}

/// Fan the query out to every selected searcher in parallel and merge the
/// per-repo responses. The results channel is buffered to the fan-out width
/// so an early error return never leaks a leg.
async fn search_all(
    query: String,
    opt: SearchOptions,
    repos: Vec<String>,
    vrepos: Arc<Vec<String>>,
    searchers: &SearcherMap,
) -> Result<(HashMap<String, SearchResponse>, usize, usize), String> {
    let started = Instant::now();
    let (tx, mut rx) =
        tokio::sync::mpsc::channel::<(String, Result<SearchResponse, String>)>(repos.len().max(1));

    let mut active = 0usize;
    for name in &repos {
        let Some(s) = searchers.get(name) else {
            continue;
        };
        let s = s.clone();
        let name = name.clone();
        let query = query.clone();
        let opt = opt.clone();
        let vsel = vrepos.clone();
        let tx = tx.clone();
        active += 1;
        tokio::spawn(async move {
            let out = match tokio::task::spawn_blocking(move || s.search(&query, &opt, &vsel)).await
            {
                Ok(Ok(r)) => Ok(r),
                Ok(Err(e)) => Err(e.to_string()),
                // A panicking leg becomes this repository's error instead of
                // taking the process down.
                Err(e) => Err(format!("search failed for {}: {}", name, e)),
            };
            let _ = tx.send((name, out)).await;
        });
    }
    drop(tx);

    let mut results: HashMap<String, SearchResponse> = HashMap::new();
    let mut files_opened = 0usize;
    for _ in 0..active {
        let Some((name, res)) = rx.recv().await else {
            break;
        };
        let mut r = res?;
        files_opened += r.files_opened;
        if !r.vmatches.is_empty() {
            let vmatches = std::mem::take(&mut r.vmatches);
            let mut vfiles = std::mem::take(&mut r.vfiles_with_match);
            let mut vrevs = std::mem::take(&mut r.vrevision);
            for (vname, matches) in vmatches {
                let files_with_match = vfiles.remove(&vname).unwrap_or(matches.len());
                let revision = vrevs.remove(&vname).unwrap_or_default();
                results.insert(
                    vname,
                    SearchResponse {
                        matches,
                        files_with_match,
                        revision,
                        ..Default::default()
                    },
                );
            }
        } else if !r.matches.is_empty() {
            results.insert(name, r);
        }
    }
    let duration_ms = started.elapsed().as_millis() as usize;
    Ok((results, files_opened, duration_ms))
}

fn param<'a>(params: &'a HashMap<String, String>, key: &str) -> &'a str {
    params.get(key).map(String::as_str).unwrap_or("")
}

/// Boolean form values accept true/1/fosho, case-insensitively.
fn parse_as_bool(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "fosho")
}

/// Parse an unsigned form value, clamping into [min, max] (0 disables a
/// bound) and falling back to `def` on junk.
fn parse_as_uint(v: &str, min: usize, max: usize, def: usize) -> usize {
    match v.parse::<usize>() {
        Err(_) => def,
        Ok(n) if max != 0 && n > max => max,
        Ok(n) if min != 0 && n < min => min,
        Ok(n) => n,
    }
}

/// `rng=<begin:end>` pages over files-with-matches.
fn parse_range(v: &str) -> (usize, usize) {
    let Some((b, e)) = v.split_once(':') else {
        return (0, 0);
    };
    (
        b.parse::<usize>().unwrap_or(0),
        e.parse::<usize>().unwrap_or(0),
    )
}

/// Resolve the `repos` form value into live repo names plus the sorted list
/// of virtual selectors. Names that do not resolve are treated as virtual
/// and activate every hidden repository whose virtual set contains them.
fn parse_repo_list(v: &str, searchers: &SearcherMap) -> (Vec<String>, Vec<String>) {
    let v = v.trim();
    if v.is_empty() || v == "*" {
        let mut repos: Vec<String> = searchers
            .iter()
            .filter(|(_, s)| !s.is_hidden())
            .map(|(n, _)| n.clone())
            .collect();
        repos.sort();
        return (repos, Vec::new());
    }

    let mut repos = Vec::new();
    let mut vrepos = Vec::new();
    for name in v.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if searchers.contains_key(name) {
            repos.push(name.to_string());
        } else {
            vrepos.push(name.to_string());
        }
    }
    vrepos.sort();
    if !vrepos.is_empty() {
        for (name, s) in searchers {
            if s.is_hidden() && vrepos.iter().any(|v| s.has_vrepo(v)) {
                repos.push(name.clone());
            }
        }
    }
    (repos, vrepos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_values_accept_the_traditional_spellings() {
        assert!(parse_as_bool("true"));
        assert!(parse_as_bool("TRUE"));
        assert!(parse_as_bool("1"));
        assert!(parse_as_bool("FoSho"));
        assert!(!parse_as_bool("yes"));
        assert!(!parse_as_bool(""));
    }

    #[test]
    fn uint_values_clamp_to_the_intended_bounds() {
        assert_eq!(parse_as_uint("", 0, 20, 2), 2);
        assert_eq!(parse_as_uint("junk", 0, 20, 2), 2);
        assert_eq!(parse_as_uint("7", 0, 20, 2), 7);
        assert_eq!(parse_as_uint("99", 0, 20, 2), 20);
        assert_eq!(parse_as_uint("1", 5, 20, 2), 5);
    }

    #[test]
    fn range_values_parse_begin_and_end() {
        assert_eq!(parse_range(""), (0, 0));
        assert_eq!(parse_range("3:10"), (3, 10));
        assert_eq!(parse_range(":10"), (0, 10));
        assert_eq!(parse_range("10"), (0, 0));
        assert_eq!(parse_range("x:y"), (0, 0));
    }
}
