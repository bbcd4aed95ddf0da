//! BM25 inverted index over tool metadata

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::metadata::ToolMetadata;
use crate::tokenize::{tokenize, tokenize_query};
use crate::{IndexResult, DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT};

/// BM25 parameters
const K1: f64 = 1.2;
const B: f64 = 0.75;

/// Field weights: a hit in the tool name counts for more than one in the
/// description, which counts for more than one buried in the schema.
const WEIGHT_NAME: f64 = 3.0;
const WEIGHT_DESCRIPTION: f64 = 1.0;
const WEIGHT_SCHEMA: f64 = 0.5;

/// Identity key, ordered for deterministic tie-breaking
type DocKey = (String, String);

/// One ranked hit. Scores are comparable only within a single query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub tool: ToolMetadata,
    pub score: f64,
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub terms: usize,
    pub servers: usize,
}

#[derive(Debug)]
struct Document {
    meta: ToolMetadata,
    /// term -> weighted frequency
    term_weights: BTreeMap<String, f64>,
    /// Sum of weighted frequencies (the document "length")
    length: f64,
}

#[derive(Default)]
struct IndexInner {
    docs: BTreeMap<DocKey, Document>,
    /// term -> number of documents containing it
    doc_freq: HashMap<String, usize>,
    total_length: f64,
}

impl IndexInner {
    fn insert(&mut self, meta: ToolMetadata) {
        let key = (meta.server_name.clone(), meta.tool_name.clone());

        // Preserve created_at across updates of the same identity
        let meta = match self.docs.get(&key) {
            Some(existing) => ToolMetadata {
                created_at: existing.meta.created_at,
                ..meta
            },
            None => meta,
        };

        self.remove(&key);

        let mut term_weights: BTreeMap<String, f64> = BTreeMap::new();
        let mut add_terms = |text: &str, weight: f64| {
            for token in tokenize(text) {
                *term_weights.entry(token).or_insert(0.0) += weight;
            }
        };

        add_terms(&meta.tool_name, WEIGHT_NAME);
        add_terms(&meta.server_name, WEIGHT_NAME);
        add_terms(&meta.description, WEIGHT_DESCRIPTION);
        add_terms(&meta.input_schema, WEIGHT_SCHEMA);

        // The qualified identifier is a first-class token so searches for
        // "server:tool" match without splitting.
        *term_weights
            .entry(meta.id().to_lowercase())
            .or_insert(0.0) += WEIGHT_NAME;

        let length: f64 = term_weights.values().sum();
        for term in term_weights.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_length += length;

        self.docs.insert(
            key,
            Document {
                meta,
                term_weights,
                length,
            },
        );
    }

    fn remove(&mut self, key: &DocKey) -> bool {
        let Some(doc) = self.docs.remove(key) else {
            return false;
        };

        for term in doc.term_weights.keys() {
            if let Some(df) = self.doc_freq.get_mut(term) {
                *df -= 1;
                if *df == 0 {
                    self.doc_freq.remove(term);
                }
            }
        }
        self.total_length -= doc.length;
        true
    }

    fn avg_length(&self) -> f64 {
        if self.docs.is_empty() {
            0.0
        } else {
            self.total_length / self.docs.len() as f64
        }
    }
}

/// Thread-safe tool index with BM25 ranking.
///
/// Quarantine filtering is deliberately not done here; the proxy tool
/// surface filters hits so the index stays a pure search structure.
#[derive(Default)]
pub struct ToolIndex {
    inner: RwLock<IndexInner>,
}

impl ToolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index or update one tool
    pub fn index_tool(&self, meta: ToolMetadata) {
        self.inner.write().insert(meta);
    }

    /// Replace a server's tool set atomically: the old set is removed and
    /// the new one inserted under one write lock.
    pub fn batch_index_tools(&self, server: &str, tools: Vec<ToolMetadata>) {
        let mut inner = self.inner.write();

        let stale: Vec<DocKey> = inner
            .docs
            .range((server.to_string(), String::new())..)
            .take_while(|((s, _), _)| s == server)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            inner.remove(&key);
        }

        for meta in tools {
            inner.insert(meta);
        }

        tracing::debug!(server = %server, total = inner.docs.len(), "tool batch indexed");
    }

    /// Remove one tool
    pub fn delete_tool(&self, server: &str, tool: &str) -> IndexResult<()> {
        let key = (server.to_string(), tool.to_string());
        if self.inner.write().remove(&key) {
            Ok(())
        } else {
            Err(crate::IndexError::NotFound {
                server: server.to_string(),
                tool: tool.to_string(),
            })
        }
    }

    /// Remove every tool belonging to `server` atomically
    pub fn delete_server_tools(&self, server: &str) {
        self.batch_index_tools(server, Vec::new());
    }

    /// Rank the corpus against `query`. Zero or negative limits fall back
    /// to the default; anything larger than 100 is clamped.
    pub fn search(&self, query: &str, limit: i64) -> IndexResult<Vec<SearchResult>> {
        let terms = tokenize_query(query);
        if terms.is_empty() {
            return Err(crate::IndexError::EmptyQuery);
        }

        let limit = if limit <= 0 {
            DEFAULT_SEARCH_LIMIT
        } else {
            (limit as usize).min(MAX_SEARCH_LIMIT)
        };

        let inner = self.inner.read();
        let doc_count = inner.docs.len() as f64;
        if doc_count == 0.0 {
            return Ok(Vec::new());
        }
        let avg_length = inner.avg_length();

        let mut scores: BTreeMap<DocKey, f64> = BTreeMap::new();
        for term in &terms {
            let Some(&df) = inner.doc_freq.get(term) else {
                continue;
            };
            let idf = (1.0 + (doc_count - df as f64 + 0.5) / (df as f64 + 0.5)).ln();

            for (key, doc) in &inner.docs {
                let Some(&tf) = doc.term_weights.get(term) else {
                    continue;
                };
                let norm = K1 * (1.0 - B + B * doc.length / avg_length);
                let contribution = idf * (tf * (K1 + 1.0)) / (tf + norm);
                *scores.entry(key.clone()).or_insert(0.0) += contribution;
            }
        }

        // Descending by score, ascending by (server, tool) on ties. The
        // BTreeMap iteration order makes the tie-break stable.
        let mut ranked: Vec<(DocKey, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(key, score)| SearchResult {
                tool: inner.docs[&key].meta.clone(),
                score,
            })
            .collect())
    }

    /// Look up one tool's metadata by identity
    pub fn get_tool(&self, server: &str, tool: &str) -> Option<ToolMetadata> {
        let key = (server.to_string(), tool.to_string());
        self.inner.read().docs.get(&key).map(|doc| doc.meta.clone())
    }

    /// Every indexed tool belonging to `server`, ordered by tool name
    pub fn server_tools(&self, server: &str) -> Vec<ToolMetadata> {
        let inner = self.inner.read();
        inner
            .docs
            .range((server.to_string(), String::new())..)
            .take_while(|((s, _), _)| s == server)
            .map(|(_, doc)| doc.meta.clone())
            .collect()
    }

    pub fn document_count(&self) -> usize {
        self.inner.read().docs.len()
    }

    /// Drop everything and index the given corpus
    pub fn rebuild(&self, tools: Vec<ToolMetadata>) {
        let mut inner = self.inner.write();
        *inner = IndexInner::default();
        for meta in tools {
            inner.insert(meta);
        }
    }

    pub fn stats(&self) -> IndexStats {
        let inner = self.inner.read();
        let mut servers: Vec<&str> = inner.docs.keys().map(|(s, _)| s.as_str()).collect();
        servers.dedup();
        IndexStats {
            documents: inner.docs.len(),
            terms: inner.doc_freq.len(),
            servers: servers.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(server: &str, tool: &str, description: &str) -> ToolMetadata {
        ToolMetadata::new(
            server,
            tool,
            description,
            r#"{"type":"object","properties":{"query":{"type":"string"}}}"#,
            "hash",
        )
    }

    fn sample_index() -> ToolIndex {
        let index = ToolIndex::new();
        index.index_tool(meta("github", "create_issue", "Create a new GitHub issue"));
        index.index_tool(meta("github", "list_issues", "List issues in a repository"));
        index.index_tool(meta("weather", "forecast", "Get the weather forecast"));
        index.index_tool(meta("fs", "read_file", "Read a file from disk"));
        index
    }

    #[test]
    fn test_search_ranks_relevant_first() {
        let index = sample_index();
        let results = index.search("github issue", 10).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].tool.server_name, "github");
    }

    #[test]
    fn test_search_matches_qualified_name() {
        let index = sample_index();
        let results = index.search("github:create_issue", 10).unwrap();
        assert_eq!(results[0].tool.id(), "github:create_issue");

        // Split form matches too
        let results = index.search("create issue", 10).unwrap();
        assert_eq!(results[0].tool.id(), "github:create_issue");
    }

    #[test]
    fn test_search_is_deterministic() {
        let index = sample_index();
        let first = index.search("issue", 10).unwrap();
        let second = index.search("issue", 10).unwrap();

        let ids_first: Vec<String> = first.iter().map(|r| r.tool.id()).collect();
        let ids_second: Vec<String> = second.iter().map(|r| r.tool.id()).collect();
        assert_eq!(ids_first, ids_second);
    }

    #[test]
    fn test_equal_scores_tie_break_by_identity() {
        let index = ToolIndex::new();
        // Identical content, different identity: identical scores
        index.index_tool(meta("beta", "twin", "identical description"));
        index.index_tool(meta("alpha", "twin", "identical description"));

        let results = index.search("identical", 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool.server_name, "alpha");
        assert_eq!(results[1].tool.server_name, "beta");
    }

    #[test]
    fn test_limit_clamping() {
        let index = sample_index();

        // Zero and negative fall back to the default
        assert!(index.search("file", 0).is_ok());
        assert!(index.search("file", -3).is_ok());

        // Oversized limits are accepted and clamped
        let results = index.search("a", 10_000).unwrap();
        assert!(results.len() <= MAX_SEARCH_LIMIT);
    }

    #[test]
    fn test_empty_query_rejected() {
        let index = sample_index();
        assert_eq!(index.search("", 10), Err(crate::IndexError::EmptyQuery));
        assert_eq!(index.search("---", 10), Err(crate::IndexError::EmptyQuery));
    }

    #[test]
    fn test_delete_server_tools_is_complete() {
        let index = sample_index();
        assert_eq!(index.document_count(), 4);

        index.delete_server_tools("github");
        assert_eq!(index.document_count(), 2);

        let results = index.search("github issue", 10).unwrap();
        assert!(results.iter().all(|r| r.tool.server_name != "github"));
    }

    #[test]
    fn test_batch_replaces_old_set() {
        let index = sample_index();
        index.batch_index_tools(
            "github",
            vec![meta("github", "merge_pr", "Merge a pull request")],
        );

        assert!(index.get_tool("github", "create_issue").is_none());
        assert!(index.get_tool("github", "merge_pr").is_some());
        assert_eq!(index.document_count(), 3);
    }

    #[test]
    fn test_update_preserves_created_at() {
        let index = ToolIndex::new();
        index.index_tool(meta("s", "t", "first"));
        let created = index.get_tool("s", "t").unwrap().created_at;

        index.index_tool(meta("s", "t", "second"));
        let after = index.get_tool("s", "t").unwrap();
        assert_eq!(after.created_at, created);
        assert_eq!(after.description, "second");
    }

    #[test]
    fn test_rebuild_replaces_corpus() {
        let index = sample_index();
        index.rebuild(vec![meta("solo", "only", "the only tool left")]);
        assert_eq!(index.document_count(), 1);
        assert!(index.get_tool("github", "create_issue").is_none());
    }

    #[test]
    fn test_stats() {
        let index = sample_index();
        let stats = index.stats();
        assert_eq!(stats.documents, 4);
        assert_eq!(stats.servers, 3);
        assert!(stats.terms > 0);
    }
}
