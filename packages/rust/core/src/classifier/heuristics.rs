//! Deterministic scoring fallback.
//!
//! A fixed rule table is evaluated against every registered partition. Each
//! rule either names one target partition or scores all of them; the winner is
//! the highest total, ties going to the earlier catalog entry.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use taxdesk_crawler::metadata::{infer_assuntos, infer_natureza};
use taxdesk_shared::text::{fold, tokens};
use taxdesk_shared::{DiscoveredDocument, DocType, Family, Natureza, PartitionDescriptor};

use crate::triage::detect_doc_type;

static JURISPRUDENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bparecer|\bacordao|jurisprudencia|\bcarf\b").expect("valid regex")
});
static TABLE_CODES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(cfop|ncm|cest)\b").expect("valid regex"));

/// Facts about a document the rules look at.
pub struct Signals {
    family_from_domain: Option<Family>,
    domain_is_confaz: bool,
    family_from_keywords: Option<Family>,
    natureza: Option<Natureza>,
    /// Folded title + URL.
    haystack: String,
    levies: bool,
    portal_type: &'static str,
    title_tokens: HashSet<String>,
}

impl Signals {
    pub fn from_document(doc: &DiscoveredDocument) -> Self {
        let haystack = fold(&format!("{} {}", doc.title, doc.url));
        let domain = doc.domain.as_deref().map(str::to_lowercase);
        let assuntos = if doc.assuntos.is_empty() {
            infer_assuntos(&doc.title)
        } else {
            doc.assuntos.clone()
        };

        Self {
            family_from_domain: domain
                .as_deref()
                .and_then(|d| d.parse::<DocType>().ok())
                .map(|d| d.family()),
            domain_is_confaz: domain.as_deref() == Some("confaz"),
            family_from_keywords: detect_doc_type(&haystack).map(|d| d.family()),
            natureza: doc.natureza.or_else(|| infer_natureza(&doc.title)),
            levies: assuntos.iter().any(|a| matches!(a.as_str(), "IBS" | "CBS" | "IS")),
            portal_type: doc.portal_type.as_str(),
            title_tokens: tokens(&doc.title, 3).into_iter().collect(),
            haystack,
        }
    }

    fn family(&self) -> Option<Family> {
        self.family_from_domain.or(self.family_from_keywords)
    }
}

/// How a rule awards points.
enum Award {
    /// `weight` once to the partition it names.
    Target(fn(&Signals) -> Option<&'static str>),
    /// `weight` times the returned count, to every partition.
    Each(fn(&Signals, &PartitionDescriptor) -> u32),
}

struct Rule {
    weight: u32,
    rationale: &'static str,
    award: Award,
}

fn specs_partition(family: Family) -> &'static str {
    match family {
        Family::Mercadorias => "vs_specs_mercadorias",
        Family::Transporte => "vs_specs_transporte",
        Family::Utilities => "vs_specs_utilities",
        Family::Declaracoes => "vs_specs_declaracoes",
        Family::Plataformas => "vs_specs_plataformas",
    }
}

static RULES: &[Rule] = &[
    Rule {
        weight: 10,
        rationale: "document domain matches the partition family",
        award: Award::Target(|s| {
            if s.domain_is_confaz {
                return Some("vs_legal_confaz");
            }
            s.family_from_domain.map(specs_partition)
        }),
    },
    Rule {
        weight: 8,
        rationale: "document nature points at this partition",
        award: Award::Target(|s| {
            Some(match s.natureza? {
                Natureza::NotaTecnica | Natureza::Manual | Natureza::InformeTecnico => {
                    specs_partition(s.family().unwrap_or(Family::Mercadorias))
                }
                Natureza::Tabela => "vs_tabelas_fiscais",
                Natureza::SchemaXml => "vs_schemas_xsd",
                Natureza::AjusteSinief | Natureza::Convenio | Natureza::AtoCotepe => {
                    "vs_legal_confaz"
                }
                Natureza::Lei | Natureza::Decreto => "vs_legal_federal",
            })
        }),
    },
    Rule {
        weight: 6,
        rationale: "title or URL names the document type",
        award: Award::Target(|s| s.family_from_keywords.map(specs_partition)),
    },
    Rule {
        weight: 6,
        rationale: "jurisprudence keywords",
        award: Award::Target(|s| {
            JURISPRUDENCE_RE
                .is_match(&s.haystack)
                .then_some("vs_jurisprudencia")
        }),
    },
    Rule {
        weight: 6,
        rationale: "fiscal table codes (CFOP, NCM, CEST)",
        award: Award::Target(|s| {
            TABLE_CODES_RE
                .is_match(&s.haystack)
                .then_some("vs_tabelas_fiscais")
        }),
    },
    Rule {
        weight: 4,
        rationale: "tax-reform subjects (IBS, CBS, IS)",
        award: Award::Target(|s| s.levies.then_some("vs_legal_federal")),
    },
    Rule {
        weight: 1,
        rationale: "portal type appears in the partition description",
        award: Award::Each(|s, p| u32::from(fold(&p.description).contains(s.portal_type))),
    },
    Rule {
        weight: 1,
        rationale: "title words overlap the partition description",
        award: Award::Each(|s, p| {
            let description: HashSet<String> = tokens(&p.description, 3).into_iter().collect();
            s.title_tokens.intersection(&description).count() as u32
        }),
    },
];

/// Score of one partition with the rules that contributed to it.
#[derive(Debug, Clone)]
pub struct PartitionScore {
    pub index: usize,
    pub partition_id: String,
    pub score: u32,
    pub reasons: Vec<&'static str>,
}

/// Score every partition and return them best first: `(score desc, index asc)`.
pub fn rank(signals: &Signals, partitions: &[PartitionDescriptor]) -> Vec<PartitionScore> {
    let targets: Vec<(&Rule, Option<&'static str>)> = RULES
        .iter()
        .map(|rule| match rule.award {
            Award::Target(select) => (rule, select(signals)),
            Award::Each(_) => (rule, None),
        })
        .collect();

    let mut scores: Vec<PartitionScore> = partitions
        .iter()
        .enumerate()
        .map(|(index, partition)| {
            let mut score = 0;
            let mut reasons = Vec::new();
            for (rule, target) in &targets {
                let points = match rule.award {
                    Award::Target(_) => {
                        if *target == Some(partition.id.as_str()) {
                            rule.weight
                        } else {
                            0
                        }
                    }
                    Award::Each(count) => rule.weight * count(signals, partition),
                };
                if points > 0 {
                    score += points;
                    reasons.push(rule.rationale);
                }
            }
            PartitionScore {
                index,
                partition_id: partition.id.clone(),
                score,
                reasons,
            }
        })
        .collect();

    scores.sort_by(|a, b| b.score.cmp(&a.score).then(a.index.cmp(&b.index)));
    scores
}
