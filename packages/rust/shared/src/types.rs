//! Core domain types shared by the routing and change-detection pipelines.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Question intent
// ---------------------------------------------------------------------------

/// Top-level intent category of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trail {
    Document,
    Integration,
    Validation,
    Event,
    Legislation,
    Operation,
    History,
    Calculation,
}

impl Trail {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "Document",
            Self::Integration => "Integration",
            Self::Validation => "Validation",
            Self::Event => "Event",
            Self::Legislation => "Legislation",
            Self::Operation => "Operation",
            Self::History => "History",
            Self::Calculation => "Calculation",
        }
    }
}

impl fmt::Display for Trail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fiscal document family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Mercadorias,
    Transporte,
    Utilities,
    Declaracoes,
    Plataformas,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mercadorias => "mercadorias",
            Self::Transporte => "transporte",
            Self::Utilities => "utilities",
            Self::Declaracoes => "declaracoes",
            Self::Plataformas => "plataformas",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete electronic fiscal document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Nfe,
    Nfce,
    Cte,
    Mdfe,
    Bpe,
    Nf3e,
    Nfcom,
    Nfgas,
    Nfag,
    Dce,
    Nff,
    Cff,
    Pes,
    One,
    Difal,
    Nfeab,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nfe => "nfe",
            Self::Nfce => "nfce",
            Self::Cte => "cte",
            Self::Mdfe => "mdfe",
            Self::Bpe => "bpe",
            Self::Nf3e => "nf3e",
            Self::Nfcom => "nfcom",
            Self::Nfgas => "nfgas",
            Self::Nfag => "nfag",
            Self::Dce => "dce",
            Self::Nff => "nff",
            Self::Cff => "cff",
            Self::Pes => "pes",
            Self::One => "one",
            Self::Difal => "difal",
            Self::Nfeab => "nfeab",
        }
    }

    /// The family a document type belongs to.
    pub fn family(&self) -> Family {
        match self {
            Self::Nfe | Self::Nfce => Family::Mercadorias,
            Self::Cte | Self::Mdfe | Self::Bpe => Family::Transporte,
            Self::Nf3e | Self::Nfcom | Self::Nfgas | Self::Nfag => Family::Utilities,
            Self::Dce => Family::Declaracoes,
            Self::Nff | Self::Cff | Self::Pes | Self::One | Self::Difal | Self::Nfeab => {
                Family::Plataformas
            }
        }
    }
}

impl std::str::FromStr for DocType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let doc_type = match s.trim().to_lowercase().replace('-', "").as_str() {
            "nfe" => Self::Nfe,
            "nfce" => Self::Nfce,
            "cte" => Self::Cte,
            "mdfe" => Self::Mdfe,
            "bpe" => Self::Bpe,
            "nf3e" => Self::Nf3e,
            "nfcom" => Self::Nfcom,
            "nfgas" => Self::Nfgas,
            "nfag" => Self::Nfag,
            "dce" => Self::Dce,
            "nff" => Self::Nff,
            "cff" => Self::Cff,
            "pes" => Self::Pes,
            "one" => Self::One,
            "difal" => Self::Difal,
            "nfeab" => Self::Nfeab,
            other => return Err(format!("unknown document type '{other}'")),
        };
        Ok(doc_type)
    }
}

/// Structured intent extracted from a question by the triage classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionIntent {
    pub trail: Trail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<Family>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<DocType>,
    /// Two-letter state code (e.g. `SP`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uf: Option<String>,
}

impl QuestionIntent {
    /// An intent with only a trail set.
    pub fn with_trail(trail: Trail) -> Self {
        Self {
            trail,
            family: None,
            doc_type: None,
            uf: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog entries
// ---------------------------------------------------------------------------

/// A knowledge partition documents are routed into and questions searched against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    /// Stable identifier (e.g. `vs_specs_mercadorias`).
    pub id: String,
    /// Free text, shown to users and used as a secondary matching signal.
    pub description: String,
}

/// Portal jurisdiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortalType {
    #[serde(rename = "nacional", alias = "national")]
    National,
    #[serde(rename = "estadual", alias = "state")]
    State,
}

impl PortalType {
    /// Catalog spelling, also matched against partition descriptions.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::National => "nacional",
            Self::State => "estadual",
        }
    }
}

impl fmt::Display for PortalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored government portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalDefinition {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub listing_path: String,
    #[serde(rename = "type")]
    pub portal_type: PortalType,
}

// ---------------------------------------------------------------------------
// Discovered documents
// ---------------------------------------------------------------------------

/// Legal or technical nature of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Natureza {
    NotaTecnica,
    Manual,
    Tabela,
    InformeTecnico,
    SchemaXml,
    AjusteSinief,
    Convenio,
    AtoCotepe,
    Lei,
    Decreto,
}

impl Natureza {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotaTecnica => "NOTA_TECNICA",
            Self::Manual => "MANUAL",
            Self::Tabela => "TABELA",
            Self::InformeTecnico => "INFORME_TECNICO",
            Self::SchemaXml => "SCHEMA_XML",
            Self::AjusteSinief => "AJUSTE_SINIEF",
            Self::Convenio => "CONVENIO",
            Self::AtoCotepe => "ATO_COTEPE",
            Self::Lei => "LEI",
            Self::Decreto => "DECRETO",
        }
    }
}

/// A document found on a portal listing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredDocument {
    pub portal_id: String,
    pub portal_type: PortalType,
    pub title: String,
    /// Absolute URL, resolved against the portal base.
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    /// Hex SHA-256 fingerprint of `(portal_id, url, title)`.
    pub content_hash: String,
    /// Listing page the document was found on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_listing: Option<String>,
    /// Document-type path segment (`nfe`, `cte`, `confaz`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natureza: Option<Natureza>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assuntos: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Fiscal model number (`55`, `65`, `57`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modelo: Option<String>,
    /// Raw body, when available, used only to build a classification excerpt.
    #[serde(skip)]
    pub content: Option<String>,
}

impl DiscoveredDocument {
    /// Minimal document with no enrichment fields.
    pub fn new(
        portal_id: impl Into<String>,
        portal_type: PortalType,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            portal_id: portal_id.into(),
            portal_type,
            title: title.into(),
            url: url.into(),
            published_at: now,
            detected_at: now,
            content_hash: String::new(),
            source_listing: None,
            domain: None,
            natureza: None,
            assuntos: Vec::new(),
            file_name: None,
            modelo: None,
            content: None,
        }
    }

    /// Key used for deduplication: the fingerprint, or the URL when it is missing.
    pub fn dedup_key(&self) -> &str {
        if self.content_hash.is_empty() {
            &self.url
        } else {
            &self.content_hash
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Which stage of the classifier produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStrategy {
    /// Accepted as returned by the completion capability.
    Llm,
    /// Completion returned a retired id that was remapped.
    LlmRemapped,
    /// Deterministic scoring fallback.
    Heuristic,
}

impl ClassificationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::LlmRemapped => "llm_remapped",
            Self::Heuristic => "heuristic",
        }
    }
}

impl std::str::FromStr for ClassificationStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "llm" => Ok(Self::Llm),
            "llm_remapped" => Ok(Self::LlmRemapped),
            "heuristic" => Ok(Self::Heuristic),
            other => Err(format!("unknown classification strategy '{other}'")),
        }
    }
}

impl fmt::Display for ClassificationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition assignment for a discovered document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub partition_id: String,
    pub tags: Vec<String>,
    pub rationale: String,
    pub score: f64,
    /// 0.0 to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_partitions: Vec<String>,
    pub strategy: ClassificationStrategy,
}

// ---------------------------------------------------------------------------
// Portal state
// ---------------------------------------------------------------------------

/// Singleton scan state: previously emitted fingerprints per portal.
///
/// Each portal's fingerprints are a set, stored as a JSON list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub seen: BTreeMap<String, BTreeSet<String>>,
}

impl PortalState {
    /// Whether `key` was already emitted for `portal_id`.
    pub fn has_seen(&self, portal_id: &str, key: &str) -> bool {
        self.seen
            .get(portal_id)
            .is_some_and(|keys| keys.contains(key))
    }

    /// Record `key` for `portal_id`. Returns `false` if it was already present.
    pub fn remember(&mut self, portal_id: &str, key: &str) -> bool {
        self.seen
            .entry(portal_id.to_string())
            .or_default()
            .insert(key.to_string())
    }

    /// Total number of fingerprints across all portals.
    pub fn fingerprint_count(&self) -> usize {
        self.seen.values().map(BTreeSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_serialization_skips_empty_fields() {
        let intent = QuestionIntent::with_trail(Trail::Calculation);
        let json = serde_json::to_string(&intent).expect("serialize");
        assert_eq!(json, r#"{"trail":"Calculation"}"#);
    }

    #[test]
    fn intent_roundtrip_with_family() {
        let intent = QuestionIntent {
            trail: Trail::Event,
            family: Some(Family::Mercadorias),
            doc_type: Some(DocType::Nfe),
            uf: Some("SP".into()),
        };
        let json = serde_json::to_string(&intent).expect("serialize");
        assert!(json.contains(r#""family":"mercadorias""#));
        assert!(json.contains(r#""doc_type":"nfe""#));
        let parsed: QuestionIntent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, intent);
    }

    #[test]
    fn doc_type_family_and_parse() {
        assert_eq!(DocType::Mdfe.family(), Family::Transporte);
        assert_eq!(DocType::Nfcom.family(), Family::Utilities);
        assert_eq!("NF-e".parse::<DocType>().unwrap(), DocType::Nfe);
        assert!("xyz".parse::<DocType>().is_err());
    }

    #[test]
    fn portal_type_accepts_english_alias() {
        let portal: PortalDefinition = toml::from_str(
            r#"
id = "sefaz-sp"
name = "SEFAZ SP"
base_url = "https://portal.fazenda.sp.gov.br"
listing_path = "/servicos/nfe"
type = "state"
"#,
        )
        .expect("parse portal");
        assert_eq!(portal.portal_type, PortalType::State);
        assert_eq!(portal.portal_type.as_str(), "estadual");
    }

    #[test]
    fn dedup_key_falls_back_to_url() {
        let mut doc = DiscoveredDocument::new(
            "portal",
            PortalType::National,
            "Title",
            "https://example.gov.br/doc",
        );
        assert_eq!(doc.dedup_key(), "https://example.gov.br/doc");
        doc.content_hash = "abc".into();
        assert_eq!(doc.dedup_key(), "abc");
    }

    #[test]
    fn natureza_serializes_screaming_snake() {
        let json = serde_json::to_string(&Natureza::AjusteSinief).unwrap();
        assert_eq!(json, r#""AJUSTE_SINIEF""#);
        assert_eq!(Natureza::NotaTecnica.as_str(), "NOTA_TECNICA");
    }

    #[test]
    fn portal_state_remember_is_idempotent() {
        let mut state = PortalState::default();
        assert!(state.remember("p1", "h1"));
        assert!(!state.remember("p1", "h1"));
        assert!(state.remember("p2", "h1"));
        assert!(state.has_seen("p1", "h1"));
        assert!(!state.has_seen("p1", "h2"));
        assert_eq!(state.fingerprint_count(), 2);
    }

    #[test]
    fn portal_state_seen_reads_and_writes_lists() {
        let mut state: PortalState =
            serde_json::from_str(r#"{"seen":{"p1":["h2","h1","h1"]}}"#).expect("deserialize");
        assert_eq!(state.fingerprint_count(), 2);
        assert!(!state.remember("p1", "h2"));
        assert!(state.remember("p1", "h3"));
        let json = serde_json::to_string(&state).expect("serialize");
        assert_eq!(json, r#"{"seen":{"p1":["h1","h2","h3"]}}"#);
    }
}
