//! Parsing of the model's classification answer.

use serde::{Deserialize, Deserializer};

use super::ClassificationFailure;

/// What the model proposed, before validation against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmProposal {
    pub partition_id: String,
    pub tags: Vec<String>,
    pub rationale: Option<String>,
    pub confidence: Option<f64>,
    pub alternatives: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnswer {
    #[serde(default, alias = "vectorStoreId")]
    partition_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    tags: Vec<String>,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default, alias = "confidence")]
    confidence_score: Option<f64>,
    #[serde(
        default,
        alias = "alternativeVectorStores",
        deserialize_with = "null_as_empty"
    )]
    alternative_partitions: Vec<String>,
}

/// `null` lists read as empty.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse a completion into a proposal.
///
/// Accepts bare JSON, JSON inside a fenced code block, or JSON surrounded by
/// prose. The target partition is `partitionId` (or the older
/// `vectorStoreId`); without it the answer is rejected.
pub fn parse_answer(text: &str) -> Result<LlmProposal, ClassificationFailure> {
    let body = strip_code_fence(text);
    let raw: RawAnswer = serde_json::from_str(body)
        .or_else(|first| match outer_object(body) {
            Some(obj) => serde_json::from_str(obj),
            None => Err(first),
        })
        .map_err(|e| ClassificationFailure::Parse(e.to_string()))?;

    let partition_id = raw
        .partition_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or(ClassificationFailure::MissingPartition)?;

    Ok(LlmProposal {
        partition_id,
        tags: raw
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        rationale: raw.rationale.filter(|r| !r.trim().is_empty()),
        confidence: raw
            .confidence_score
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0)),
        alternatives: raw.alternative_partitions,
    })
}

/// Inner text of a leading ```` ``` ```` block, or the trimmed input.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string (`json`, `JSON`, ...).
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    match rest.rfind("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let p = parse_answer(
            r#"{"partitionId":"vs_schemas_xsd","tags":["xsd"," "],"rationale":"schema","confidenceScore":0.9,"alternativePartitions":["vs_specs_transporte"]}"#,
        )
        .unwrap();
        assert_eq!(p.partition_id, "vs_schemas_xsd");
        assert_eq!(p.tags, vec!["xsd"]);
        assert_eq!(p.rationale.as_deref(), Some("schema"));
        assert_eq!(p.confidence, Some(0.9));
        assert_eq!(p.alternatives, vec!["vs_specs_transporte"]);
    }

    #[test]
    fn strips_fenced_block_and_accepts_legacy_key() {
        let text = "```json\n{\"vectorStoreId\": \"tabelas-cfop\", \"confidence\": 1.7}\n```";
        let p = parse_answer(text).unwrap();
        assert_eq!(p.partition_id, "tabelas-cfop");
        assert_eq!(p.confidence, Some(1.0));
    }

    #[test]
    fn finds_object_inside_prose() {
        let p = parse_answer("Claro! {\"partitionId\": \"vs_legal_confaz\"} Espero ter ajudado.").unwrap();
        assert_eq!(p.partition_id, "vs_legal_confaz");
        assert!(p.tags.is_empty());
    }

    #[test]
    fn null_lists_read_as_empty() {
        let p = parse_answer(
            r#"{"partitionId":"vs_legal_confaz","tags":null,"rationale":null,"alternativePartitions":null}"#,
        )
        .unwrap();
        assert_eq!(p.partition_id, "vs_legal_confaz");
        assert!(p.tags.is_empty());
        assert!(p.alternatives.is_empty());
        assert_eq!(p.rationale, None);
    }

    #[test]
    fn missing_partition_is_rejected() {
        assert_eq!(
            parse_answer(r#"{"tags":["nfe"]}"#).unwrap_err(),
            ClassificationFailure::MissingPartition
        );
        assert_eq!(
            parse_answer(r#"{"partitionId":"  "}"#).unwrap_err(),
            ClassificationFailure::MissingPartition
        );
    }

    #[test]
    fn non_json_is_a_parse_failure() {
        assert!(matches!(
            parse_answer("vs_specs_mercadorias").unwrap_err(),
            ClassificationFailure::Parse(_)
        ));
    }
}
