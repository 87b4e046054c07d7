//! Separator-driven text chunker.
//!
//! Extracted documents arrive as one text per page, with sections marked by
//! a configurable separator (`|||` by default). Sections are packed greedily
//! into chunks of at most `max_chunk_size` whitespace-delimited words; the
//! running chunk carries over page boundaries so short pages merge.
//!
//! Pages may also carry entity fields (`product_name`, `risk_class`, …)
//! next to their text; [`merge_pages`] separates the two.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Pack separator-delimited sections of `texts` into word-bounded chunks.
///
/// A single section longer than the limit is kept whole.
pub fn recursive_chunking<S: AsRef<str>>(
    texts: &[S],
    separator: &str,
    max_chunk_size: usize,
) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for text in texts {
        for entry in text.as_ref().split(separator) {
            if current.is_empty() {
                current = entry.to_string();
                continue;
            }
            if word_count(&current) + word_count(entry) > max_chunk_size {
                chunks.push(std::mem::replace(&mut current, entry.to_string()));
            } else {
                current.push('\n');
                current.push_str(entry);
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// JSON truthiness: null, false, zero and empty strings/arrays/objects are falsy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Split extracted pages into their texts and the merged entity metadata.
///
/// A page is either an object with a string `content` plus entity fields,
/// or raw text. For each entity key the first truthy value seen wins.
pub fn merge_pages(pages: &[Value]) -> (Vec<String>, Map<String, Value>) {
    let mut texts = Vec::with_capacity(pages.len());
    let mut metadata = Map::new();

    for page in pages {
        match page {
            Value::Object(obj) if obj.get("content").map(Value::is_string).unwrap_or(false) => {
                for (key, value) in obj {
                    if key == "content" {
                        if let Some(text) = value.as_str() {
                            texts.push(text.to_string());
                        }
                        continue;
                    }
                    let keep_existing = metadata.get(key).map(is_truthy).unwrap_or(false);
                    if !keep_existing {
                        metadata.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::String(text) => texts.push(text.clone()),
            other => {
                tracing::warn!("page without text content, indexing raw JSON");
                texts.push(other.to_string());
            }
        }
    }

    (texts, metadata)
}

/// SHA-256 of a chunk's text; re-uploads skip chunks whose hash is already stored.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = recursive_chunking(&["alpha|||beta|||gamma"], "|||", 500);
        assert_eq!(chunks, vec!["alpha\nbeta\ngamma".to_string()]);
    }

    #[test]
    fn test_empty_input() {
        let chunks = recursive_chunking::<&str>(&[], "|||", 500);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_splits_when_limit_exceeded() {
        // three sections of 3 words each, limit 5 words
        let text = "one two three|||four five six|||seven eight nine";
        let chunks = recursive_chunking(&[text], "|||", 5);
        assert_eq!(
            chunks,
            vec![
                "one two three".to_string(),
                "four five six".to_string(),
                "seven eight nine".to_string(),
            ]
        );
    }

    #[test]
    fn test_limit_is_inclusive() {
        let chunks = recursive_chunking(&["a b|||c d e"], "|||", 5);
        assert_eq!(chunks, vec!["a b\nc d e".to_string()]);
    }

    #[test]
    fn test_running_chunk_spans_pages() {
        let pages = ["Page one intro", "Page two body"];
        let chunks = recursive_chunking(&pages, "|||", 100);
        assert_eq!(chunks, vec!["Page one intro\nPage two body".to_string()]);
    }

    #[test]
    fn test_oversized_section_kept_whole() {
        let long = (0..20).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let text = format!("short|||{}|||tail", long);
        let chunks = recursive_chunking(&[text], "|||", 5);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1], long);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta|||Gamma delta|||Epsilon zeta";
        let c1 = recursive_chunking(&[text], "|||", 3);
        let c2 = recursive_chunking(&[text], "|||", 3);
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_merge_pages_first_truthy_value_wins() {
        let pages = vec![
            json!({"content": "p1", "product_name": "", "manufacturer": "Acme AM", "risk_class": ""}),
            json!({"content": "p2", "product_name": "Acme World", "manufacturer": "Other", "risk_class": 0}),
            json!("raw third page"),
        ];
        let (texts, meta) = merge_pages(&pages);
        assert_eq!(texts, vec!["p1", "p2", "raw third page"]);
        assert_eq!(meta["product_name"], json!("Acme World"));
        assert_eq!(meta["manufacturer"], json!("Acme AM"));
        // a falsy value is replaced by any later value, falsy or not
        assert_eq!(meta["risk_class"], json!(0));
    }

    #[test]
    fn test_merge_pages_object_without_content() {
        let pages = vec![json!({"product_name": "X"})];
        let (texts, meta) = merge_pages(&pages);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("product_name"));
        assert!(meta.is_empty());
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }
}
