//! Document classifier: assigns a discovered document to one partition.
//!
//! Three stages run as an explicit chain:
//!
//! 1. [`DocumentClassifier::propose`] asks the completion backend for a
//!    partition and parses its answer,
//! 2. [`DocumentClassifier::validate`] accepts registered ids and remaps
//!    retired ones with [`remap_legacy_id`],
//! 3. [`DocumentClassifier::heuristic`] scores every partition with a fixed
//!    rule table and always produces a result.
//!
//! A failure in stage 1 or 2 is logged and falls through to stage 3, so
//! [`DocumentClassifier::classify`] never fails.

pub mod heuristics;
pub mod prompt;
pub mod remap;
pub mod response;

use std::sync::Arc;

use tracing::{debug, info, warn};

use taxdesk_shared::{
    CatalogStore, ClassificationResult, ClassificationStrategy, CompletionBackend,
    DiscoveredDocument,
};

pub use remap::remap_legacy_id;
pub use response::{LlmProposal, parse_answer};

use heuristics::{Signals, rank};
use prompt::build_prompt;

/// Why the model-backed stages did not produce a result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassificationFailure {
    #[error("no completion backend configured")]
    Unavailable,
    #[error("completion failed: {0}")]
    Completion(String),
    #[error("unparseable answer: {0}")]
    Parse(String),
    #[error("answer has no partition id")]
    MissingPartition,
    #[error("unknown partition '{0}'")]
    UnknownPartition(String),
}

/// LLM-first classifier with a deterministic fallback.
pub struct DocumentClassifier {
    catalog: Arc<CatalogStore>,
    completion: Option<Arc<dyn CompletionBackend>>,
}

impl DocumentClassifier {
    pub fn new(catalog: Arc<CatalogStore>, completion: Option<Arc<dyn CompletionBackend>>) -> Self {
        Self {
            catalog,
            completion,
        }
    }

    /// Heuristics only.
    pub fn heuristic_only(catalog: Arc<CatalogStore>) -> Self {
        Self::new(catalog, None)
    }

    /// Classify `doc`. Always returns a result.
    pub async fn classify(&self, doc: &DiscoveredDocument) -> ClassificationResult {
        let attempt = match self.propose(doc).await {
            Ok(proposal) => self.validate(doc, proposal),
            Err(failure) => Err(failure),
        };

        let result = attempt.unwrap_or_else(|failure| {
            warn!(
                title = %doc.title,
                reason = %failure,
                "model classification failed, using heuristics"
            );
            self.heuristic(doc)
        });

        info!(
            title = %doc.title,
            partition_id = %result.partition_id,
            strategy = %result.strategy,
            score = result.score,
            "document classified"
        );
        result
    }

    /// Stage 1: ask the model.
    pub async fn propose(&self, doc: &DiscoveredDocument) -> Result<LlmProposal, ClassificationFailure> {
        let backend = self
            .completion
            .as_ref()
            .ok_or(ClassificationFailure::Unavailable)?;

        let prompt = build_prompt(doc, &self.catalog.list_partitions());
        let answer = backend
            .complete(&prompt)
            .await
            .map_err(|e| ClassificationFailure::Completion(e.to_string()))?;
        debug!(chars = answer.len(), "classification answer received");

        parse_answer(&answer)
    }

    /// Stage 2: accept a registered id or remap a retired one.
    pub fn validate(
        &self,
        doc: &DiscoveredDocument,
        proposal: LlmProposal,
    ) -> Result<ClassificationResult, ClassificationFailure> {
        let (partition_id, strategy) = if self.catalog.is_valid_partition_id(&proposal.partition_id) {
            (proposal.partition_id.clone(), ClassificationStrategy::Llm)
        } else {
            match remap_legacy_id(&proposal.partition_id) {
                Some(current) if self.catalog.is_valid_partition_id(current) => {
                    debug!(from = %proposal.partition_id, to = current, "remapped legacy partition id");
                    (current.to_string(), ClassificationStrategy::LlmRemapped)
                }
                _ => return Err(ClassificationFailure::UnknownPartition(proposal.partition_id)),
            }
        };

        let mut rationale = proposal
            .rationale
            .clone()
            .unwrap_or_else(|| "Partition chosen by the language model.".to_string());
        if strategy == ClassificationStrategy::LlmRemapped {
            rationale.push_str(&format!(
                " (legacy id '{}' remapped to '{partition_id}')",
                proposal.partition_id
            ));
        }

        let alternative_partitions = dedup(
            proposal
                .alternatives
                .iter()
                .filter(|id| **id != partition_id && self.catalog.is_valid_partition_id(id))
                .cloned(),
        );

        Ok(ClassificationResult {
            tags: build_tags(doc, &proposal.tags),
            rationale,
            score: proposal.confidence.unwrap_or(1.0),
            confidence_score: proposal.confidence,
            alternative_partitions,
            partition_id,
            strategy,
        })
    }

    /// Stage 3: rule-table scoring. Total over any registry, including an empty one.
    pub fn heuristic(&self, doc: &DiscoveredDocument) -> ClassificationResult {
        let partitions = self.catalog.list_partitions();
        let tags = build_tags(doc, &[]);

        let ranked = rank(&Signals::from_document(doc), &partitions);
        let Some(best) = ranked.first() else {
            return ClassificationResult {
                partition_id: String::new(),
                tags,
                rationale: "Partition registry is empty; no partition assigned.".into(),
                score: 0.0,
                confidence_score: None,
                alternative_partitions: Vec::new(),
                strategy: ClassificationStrategy::Heuristic,
            };
        };

        let total: u32 = ranked.iter().map(|s| s.score).sum();
        let rationale = if best.score == 0 {
            "No rule matched; defaulting to the first registered partition.".to_string()
        } else {
            let mut reasons = best.reasons.clone();
            reasons.dedup();
            format!("Heuristic match: {}.", reasons.join("; "))
        };

        ClassificationResult {
            partition_id: best.partition_id.clone(),
            tags,
            rationale,
            score: f64::from(best.score),
            confidence_score: (total > 0).then(|| f64::from(best.score) / f64::from(total)),
            alternative_partitions: ranked
                .iter()
                .skip(1)
                .filter(|s| s.score > 0)
                .take(2)
                .map(|s| s.partition_id.clone())
                .collect(),
            strategy: ClassificationStrategy::Heuristic,
        }
    }
}

/// Document metadata tags followed by model tags, without duplicates.
fn build_tags(doc: &DiscoveredDocument, extra: &[String]) -> Vec<String> {
    let mut tags = vec![doc.portal_id.clone(), doc.portal_type.as_str().to_string()];
    tags.extend(doc.domain.clone());
    tags.extend(doc.natureza.map(|n| n.as_str().to_string()));
    tags.extend(doc.assuntos.iter().cloned());
    tags.extend(doc.modelo.clone());
    tags.extend(extra.iter().cloned());
    dedup(tags.into_iter().filter(|t| !t.is_empty()))
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use taxdesk_shared::{Natureza, PartitionDescriptor, PortalType, Result, TaxDeskError};

    /// Replies with a fixed answer (or error) and records prompts.
    struct ScriptedCompletion {
        answer: std::result::Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedCompletion {
        fn ok(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: Ok(answer.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                answer: Err("upstream 500".into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedCompletion {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.answer.clone().map_err(TaxDeskError::Completion)
        }
    }

    fn catalog() -> Arc<CatalogStore> {
        Arc::new(CatalogStore::builtin().unwrap())
    }

    fn nota_tecnica() -> DiscoveredDocument {
        DiscoveredDocument::new(
            "nfe-nacional",
            PortalType::National,
            "Nota Técnica 2025.001",
            "https://www.nfe.fazenda.gov.br/portal/nt2025001",
        )
    }

    #[tokio::test]
    async fn heuristic_only_routes_nota_tecnica() {
        let classifier = DocumentClassifier::heuristic_only(catalog());
        let result = classifier.classify(&nota_tecnica()).await;
        assert_eq!(result.partition_id, "vs_specs_mercadorias");
        assert_eq!(result.strategy, ClassificationStrategy::Heuristic);
        assert!(result.score > 0.0);
        let confidence = result.confidence_score.unwrap();
        assert!(confidence > 0.0 && confidence <= 1.0);
        assert_eq!(result.tags, vec!["nfe-nacional", "nacional"]);
    }

    #[tokio::test]
    async fn accepts_registered_llm_answer() {
        let backend = ScriptedCompletion::ok(
            r#"{"partitionId":"vs_schemas_xsd","tags":["xsd","nfe-nacional"],"rationale":"Schema package","confidenceScore":0.8,"alternativePartitions":["vs_specs_mercadorias","bogus","vs_schemas_xsd"]}"#,
        );
        let classifier = DocumentClassifier::new(catalog(), Some(backend.clone()));
        let result = classifier.classify(&nota_tecnica()).await;

        assert_eq!(result.partition_id, "vs_schemas_xsd");
        assert_eq!(result.strategy, ClassificationStrategy::Llm);
        assert_eq!(result.confidence_score, Some(0.8));
        assert_eq!(result.rationale, "Schema package");
        assert_eq!(result.alternative_partitions, vec!["vs_specs_mercadorias"]);
        assert_eq!(result.tags, vec!["nfe-nacional", "nacional", "xsd"]);
        assert!(backend.prompts.lock().unwrap()[0].contains("Nota Técnica 2025.001"));
    }

    #[tokio::test]
    async fn legacy_id_is_remapped() {
        let classifier = DocumentClassifier::new(
            catalog(),
            Some(ScriptedCompletion::ok("```json\n{\"vectorStoreId\": \"tabelas-cfop\"}\n```")),
        );
        let result = classifier.classify(&nota_tecnica()).await;
        assert_eq!(result.partition_id, "vs_tabelas_fiscais");
        assert_eq!(result.strategy, ClassificationStrategy::LlmRemapped);
        assert!(result.rationale.contains("tabelas-cfop"));
    }

    #[tokio::test]
    async fn unknown_id_falls_back_to_heuristics() {
        let classifier = DocumentClassifier::new(
            catalog(),
            Some(ScriptedCompletion::ok(r#"{"partitionId":"vs_nao_existe"}"#)),
        );
        let doc = nota_tecnica();
        let proposal = classifier.propose(&doc).await.unwrap();
        assert_eq!(
            classifier.validate(&doc, proposal).unwrap_err(),
            ClassificationFailure::UnknownPartition("vs_nao_existe".into())
        );

        let result = classifier.classify(&doc).await;
        assert_eq!(result.strategy, ClassificationStrategy::Heuristic);
        assert_eq!(result.partition_id, "vs_specs_mercadorias");
    }

    #[tokio::test]
    async fn classifier_is_total_when_backend_always_fails() {
        let classifier = DocumentClassifier::new(catalog(), Some(ScriptedCompletion::failing()));
        let mut doc = DiscoveredDocument::new(
            "sefaz-sp",
            PortalType::State,
            "Tabela CFOP - Código Fiscal de Operações e Prestações",
            "https://www.fazenda.sp.gov.br/tabelas/cfop.xlsx",
        );
        doc.natureza = Some(Natureza::Tabela);
        doc.domain = Some("nfe".into());

        assert!(matches!(
            classifier.propose(&doc).await.unwrap_err(),
            ClassificationFailure::Completion(_)
        ));
        let result = classifier.classify(&doc).await;
        assert_eq!(result.partition_id, "vs_tabelas_fiscais");
        assert_eq!(result.strategy, ClassificationStrategy::Heuristic);
        // domain rule still credits the NF-e specs as an alternative
        assert!(result.alternative_partitions.contains(&"vs_specs_mercadorias".to_string()));
        assert_eq!(result.tags, vec!["sefaz-sp", "estadual", "nfe", "TABELA"]);
    }

    #[tokio::test]
    async fn missing_backend_is_unavailable() {
        let classifier = DocumentClassifier::heuristic_only(catalog());
        assert_eq!(
            classifier.propose(&nota_tecnica()).await.unwrap_err(),
            ClassificationFailure::Unavailable
        );
    }

    #[tokio::test]
    async fn empty_registry_still_returns_a_value() {
        let catalog = Arc::new(CatalogStore::from_parts(vec![], vec![]).unwrap());
        let classifier = DocumentClassifier::new(
            catalog,
            Some(ScriptedCompletion::ok(r#"{"partitionId":"vs_specs_mercadorias"}"#)),
        );
        let result = classifier.classify(&nota_tecnica()).await;
        assert_eq!(result.partition_id, "");
        assert_eq!(result.score, 0.0);
        assert!(result.rationale.contains("empty"));
    }

    #[tokio::test]
    async fn all_zero_scores_pick_first_partition() {
        let catalog = Arc::new(
            CatalogStore::from_parts(
                vec![],
                vec![
                    PartitionDescriptor {
                        id: "first".into(),
                        description: "alpha".into(),
                    },
                    PartitionDescriptor {
                        id: "second".into(),
                        description: "beta".into(),
                    },
                ],
            )
            .unwrap(),
        );
        let classifier = DocumentClassifier::heuristic_only(catalog);
        let result = classifier
            .classify(&DiscoveredDocument::new("p", PortalType::National, "xyz", "https://x.gov.br/"))
            .await;
        assert_eq!(result.partition_id, "first");
        assert_eq!(result.score, 0.0);
        assert_eq!(result.confidence_score, None);
        assert!(result.alternative_partitions.is_empty());
    }
}
