//! Parse completion replies into triplet records
//!
//! Two paths, first success wins:
//!
//! 1. A fenced ```` ```json ```` block holding either an object with a triple
//!    list (`三元组列表` or `triples`) or a bare array. Items are objects with
//!    `head`/`relationship`/`tail` keys, or positional arrays
//!    `[head_label, head_type, rel_label, rel_type, tail_label, tail_type, ..]`.
//! 2. The embedded-fragment pattern
//!    `head：{..}；relationship：{..}；tail：{..}` anywhere in the reply.
//!
//! Parsing never fails: an unusable reply yields no records.

use kgx_domain::{Entity, TripletRecord};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

/// Keys under which a triple list may appear
const LIST_KEYS: &[&str] = &["三元组列表", "triples"];

/// Minimum positions in a compact triple
const POSITIONAL_FIELDS: usize = 6;

static FRAGMENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"head[:：]\s*(\{.*?\})\s*[;；]\s*relationship[:：]\s*(\{.*?\})\s*[;；]\s*tail[:：]\s*(\{.*?\})",
    )
    .unwrap_or_else(|e| unreachable!("fragment pattern is valid: {}", e))
});

/// Parse a completion reply into records without provenance
///
/// # Examples
///
/// ```
/// use kgx_extractor::parse_reply;
///
/// let reply = r#"head：{"label": "Alice", "type": "Person"}；relationship：{"label": "works at", "type": "EmployedBy"}；tail：{"label": "Acme", "type": "Company"}"#;
/// let records = parse_reply(reply);
/// assert_eq!(records.len(), 1);
/// assert_eq!(records[0].tail.label, "Acme");
///
/// assert!(parse_reply("I could not find any relations.").is_empty());
/// ```
pub fn parse_reply(reply: &str) -> Vec<TripletRecord> {
    let structured = parse_fenced_block(reply);
    if !structured.is_empty() {
        debug!(records = structured.len(), "Parsed fenced block");
        return structured;
    }

    let fallback = parse_fragments(reply);
    debug!(records = fallback.len(), "Parsed embedded fragments");
    fallback
}

/// Content of the first ```` ```json ```` block, if closed
fn fenced_json(reply: &str) -> Option<&str> {
    const OPEN: &str = "```json";
    let start = reply.find(OPEN)? + OPEN.len();
    let end = reply[start..].find("```")? + start;
    Some(reply[start..end].trim())
}

fn parse_fenced_block(reply: &str) -> Vec<TripletRecord> {
    let Some(content) = fenced_json(reply) else {
        return Vec::new();
    };

    let value: Value = match serde_json::from_str(content) {
        Ok(value) => value,
        Err(e) => {
            debug!("Fenced block is not valid JSON: {}", e);
            return Vec::new();
        }
    };

    let items = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match LIST_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
        {
            Some(items) => items,
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items.iter().filter_map(record_from_item).collect()
}

fn record_from_item(item: &Value) -> Option<TripletRecord> {
    match item {
        Value::Array(fields) if fields.len() >= POSITIONAL_FIELDS => {
            let field = |i: usize| scalar_text(&fields[i]);
            Some(TripletRecord::new(
                Entity::new(field(0)?, field(1)?),
                Entity::new(field(2)?, field(3)?),
                Entity::new(field(4)?, field(5)?),
            ))
        }
        Value::Object(map) => Some(TripletRecord::new(
            entity_from_value(map.get("head")?)?,
            entity_from_value(map.get("relationship")?)?,
            entity_from_value(map.get("tail")?)?,
        )),
        _ => None,
    }
}

/// An entity from `{"label": .., "type": ..}` or a bare string
fn entity_from_value(value: &Value) -> Option<Entity> {
    match value {
        Value::String(label) => Some(Entity::new(label.clone(), "")),
        Value::Object(map) => {
            let label = map
                .get("label")
                .or_else(|| map.get("name"))
                .and_then(scalar_text)?;
            let kind = map.get("type").and_then(scalar_text).unwrap_or_default();
            Some(Entity::new(label, kind))
        }
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_fragments(reply: &str) -> Vec<TripletRecord> {
    let text = reply.replace('\r', "");
    FRAGMENT_PATTERN
        .captures_iter(&text)
        .filter_map(|captures| {
            let head = parse_fragment(&captures[1])?;
            let relationship = parse_fragment(&captures[2])?;
            let tail = parse_fragment(&captures[3])?;
            Some(TripletRecord::new(head, relationship, tail))
        })
        .collect()
}

/// Parse one `{..}` fragment, retrying with normalized quotes
fn parse_fragment(fragment: &str) -> Option<Entity> {
    let parsed = serde_json::from_str::<Value>(fragment)
        .ok()
        .or_else(|| serde_json::from_str::<Value>(&normalize_quotes(fragment)).ok());

    match parsed.as_ref().and_then(entity_from_value) {
        Some(entity) => Some(entity),
        None => {
            debug!("Skipping unparseable fragment: {}", fragment);
            None
        }
    }
}

fn normalize_quotes(fragment: &str) -> String {
    fragment
        .chars()
        .map(|c| match c {
            '\'' | '“' | '”' | '‘' | '’' => '"',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_list() {
        let reply = r#"Here are the results:
```json
{
  "三元组列表": [
    {
      "head": {"label": "Alice", "type": "Person"},
      "relationship": {"label": "works at", "type": "EmployedBy"},
      "tail": {"label": "Acme", "type": "Company"}
    },
    {"head": {"label": "incomplete"}}
  ]
}
```"#;
        let records = parse_reply(reply);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].head, Entity::new("Alice", "Person"));
        assert_eq!(records[0].relationship, Entity::new("works at", "EmployedBy"));
        assert_eq!(records[0].tail, Entity::new("Acme", "Company"));
        assert!(records[0].provenance.is_none());
    }

    #[test]
    fn test_parse_positional_arrays() {
        let reply = "```json\n{\"triples\": [[\"Alice\", \"Person\", \"works at\", \"EmployedBy\", \"Acme\", \"Company\", 0.9], [\"too\", \"short\"]]}\n```";
        let records = parse_reply(reply);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].head.kind, "Person");
        assert_eq!(records[0].relationship.label, "works at");
        assert_eq!(records[0].tail.label, "Acme");
    }

    #[test]
    fn test_positional_matches_object_form() {
        let positional = parse_reply(
            "```json\n[[\"Alice\", \"Person\", \"works at\", \"EmployedBy\", \"Acme\", \"Company\"]]\n```",
        );
        let fragments = parse_reply(
            r#"head：{"label": "Alice", "type": "Person"}；relationship：{"label": "works at", "type": "EmployedBy"}；tail：{"label": "Acme", "type": "Company"}"#,
        );
        assert_eq!(positional, fragments);
    }

    #[test]
    fn test_string_entities() {
        let reply = "```json\n[{\"head\": \"Alice\", \"relationship\": \"knows\", \"tail\": \"Bob\"}]\n```";
        let records = parse_reply(reply);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tail, Entity::new("Bob", ""));
    }

    #[test]
    fn test_malformed_block_falls_back_to_fragments() {
        let reply = "```json\n{not json\n```\nhead: {\"label\": \"A\", \"type\": \"T\"}; relationship: {\"label\": \"r\", \"type\": \"R\"}; tail: {\"label\": \"B\", \"type\": \"T\"}";
        let records = parse_reply(reply);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].head.label, "A");
        assert_eq!(records[0].tail.label, "B");
    }

    #[test]
    fn test_fragments_with_single_quotes() {
        let reply = "head：{'label': 'Alice', 'type': 'Person'}；relationship：{'label': 'founded', 'type': 'Founded'}；tail：{'label': 'Acme', 'type': 'Company'}";
        let records = parse_reply(reply);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].relationship.label, "founded");
    }

    #[test]
    fn test_multiple_fragments_and_skips() {
        let reply = concat!(
            "head：{\"label\": \"A\", \"type\": \"T\"}；relationship：{\"label\": \"r\", \"type\": \"R\"}；tail：{\"label\": \"B\", \"type\": \"T\"}\r\n",
            "head：{broken}；relationship：{\"label\": \"r\"}；tail：{\"label\": \"C\"}\n",
            "head：{\"label\": \"C\", \"type\": \"T\"}；relationship：{\"label\": \"s\", \"type\": \"S\"}；tail：{\"label\": \"D\", \"type\": \"T\"}",
        );
        let records = parse_reply(reply);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].head.label, "C");
    }

    #[test]
    fn test_schema_mismatch_yields_empty() {
        assert!(parse_reply("```json\n{\"other\": [1, 2, 3]}\n```").is_empty());
        assert!(parse_reply("```json\n\"just a string\"\n```").is_empty());
    }

    #[test]
    fn test_unstructured_reply_yields_empty() {
        assert!(parse_reply("").is_empty());
        assert!(parse_reply("No relations found in this passage.").is_empty());
        assert!(parse_reply("```json\n[]").is_empty());
    }
}
