//! JSONL ingest format.
//!
//! Each non-blank line is one operation:
//!
//! ```text
//! {"op": "put", "doc": {"id": "t1", "class": "task", "attributes": {"title": "Login fails"}}}
//! {"op": "remove", "id": "t1"}
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use fulltext_types::{DocId, SourceDoc};

/// One line of an ingest file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IngestOp {
    /// Create or replace a source document
    Put { doc: SourceDoc },

    /// Delete a source document
    Remove { id: DocId },
}

/// Parse a JSONL body, skipping blank lines.
pub fn parse_ingest(body: &str) -> Result<Vec<IngestOp>> {
    body.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid ingest line {}", n + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_put_and_remove() {
        let body = r#"
{"op": "put", "doc": {"id": "t1", "class": "task", "attributes": {"title": "Login fails"}}}

{"op": "remove", "id": "t0"}
"#;
        let ops = parse_ingest(body).unwrap();
        assert_eq!(ops.len(), 2);
        match &ops[0] {
            IngestOp::Put { doc } => {
                assert_eq!(doc.id, "t1");
                assert_eq!(doc.class, "task");
                assert_eq!(doc.attributes["title"], "Login fails");
            }
            other => panic!("Expected put, got {other:?}"),
        }
        assert_eq!(ops[1], IngestOp::Remove { id: "t0".into() });
    }

    #[test]
    fn test_parse_error_names_line() {
        let body = "{\"op\": \"remove\", \"id\": \"a\"}\n{\"op\": \"rename\"}\n";
        let err = parse_ingest(body).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
