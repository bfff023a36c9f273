//! Classification prompt and content excerpts.

use std::fmt::Write;

use taxdesk_shared::{DiscoveredDocument, PartitionDescriptor};

const HEAD_CHARS: usize = 1000;
const TAIL_CHARS: usize = 500;

/// Build the classification prompt for `doc` against `partitions`.
pub fn build_prompt(doc: &DiscoveredDocument, partitions: &[PartitionDescriptor]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You route Brazilian tax-compliance documents into knowledge partitions.\n\
         Pick exactly one partition id from the list below.\n\n## Partitions\n",
    );
    for p in partitions {
        let _ = writeln!(prompt, "- {}: {}", p.id, p.description);
    }

    prompt.push_str("\n## Document\n");
    let _ = writeln!(prompt, "- title: {}", doc.title);
    let _ = writeln!(prompt, "- url: {}", doc.url);
    let _ = writeln!(prompt, "- portal: {} ({})", doc.portal_id, doc.portal_type);
    let _ = writeln!(prompt, "- published: {}", doc.published_at.format("%Y-%m-%d"));
    if let Some(domain) = &doc.domain {
        let _ = writeln!(prompt, "- domain: {domain}");
    }
    if let Some(natureza) = doc.natureza {
        let _ = writeln!(prompt, "- natureza: {}", natureza.as_str());
    }
    if !doc.assuntos.is_empty() {
        let _ = writeln!(prompt, "- assuntos: {}", doc.assuntos.join(", "));
    }
    if let Some(file_name) = &doc.file_name {
        let _ = writeln!(prompt, "- file: {file_name}");
    }
    if let Some(modelo) = &doc.modelo {
        let _ = writeln!(prompt, "- modelo: {modelo}");
    }

    if let Some(excerpt) = doc.content.as_deref().and_then(|c| excerpt(doc, c)) {
        let _ = write!(prompt, "\n## Excerpt\n{excerpt}\n");
    }

    prompt.push_str(
        "\n## Answer\nReply with JSON only:\n\
         {\"partitionId\": \"<id>\", \"tags\": [\"...\"], \"rationale\": \"...\", \
         \"confidenceScore\": 0.0, \"alternativePartitions\": [\"<id>\"]}\n",
    );
    prompt
}

/// How a document body should be cut down for the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Tabular,
    Schema,
    Text,
}

fn content_kind(doc: &DiscoveredDocument) -> ContentKind {
    let name = doc
        .file_name
        .as_deref()
        .unwrap_or(&doc.url)
        .to_lowercase();
    let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    match ext {
        "csv" | "tsv" | "txt" => ContentKind::Tabular,
        "xsd" | "xml" => ContentKind::Schema,
        _ => ContentKind::Text,
    }
}

/// Excerpt of `content` for the prompt, or `None` when nothing useful remains.
pub fn excerpt(doc: &DiscoveredDocument, content: &str) -> Option<String> {
    let text = match content_kind(doc) {
        ContentKind::Schema => return None,
        ContentKind::Tabular => content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .take(3)
            .collect::<Vec<_>>()
            .join("\n"),
        ContentKind::Text => head_and_tail(strip_front_matter(content)),
    };
    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Drop a leading YAML front-matter block (`---` ... `---`).
fn strip_front_matter(content: &str) -> &str {
    let trimmed = content.trim_start();
    let Some(rest) = trimmed
        .strip_prefix("---\n")
        .or_else(|| trimmed.strip_prefix("---\r\n"))
    else {
        return content;
    };
    match rest.find("\n---") {
        Some(end) => {
            let after = &rest[end + 4..];
            after.split_once('\n').map(|(_, body)| body).unwrap_or("")
        }
        None => content,
    }
}

fn head_and_tail(text: &str) -> String {
    let total = text.chars().count();
    if total <= HEAD_CHARS + TAIL_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(HEAD_CHARS).collect();
    let tail: String = text.chars().skip(total - TAIL_CHARS).collect();
    format!("{head}\n[...]\n{tail}")
}
