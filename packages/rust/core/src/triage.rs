//! Deterministic question triage: trail, family, document type and state.
//!
//! Two independent ordered cascades run over the accent-folded question; the
//! first matching rule of each cascade wins. The state code is matched against
//! the original text so only upper-case abbreviations count.

use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use taxdesk_shared::text::fold;
use taxdesk_shared::{DocType, Family, QuestionIntent, Trail};

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid regex")
}

/// Trail rules in priority order. Anything unmatched is `Document`.
static TRAIL_RULES: LazyLock<Vec<(Regex, Trail)>> = LazyLock::new(|| {
    vec![
        (
            compile(r"calculo|aliquota|\bcfop\b|\bncm\b|base\s+de\s+calculo|tabela\s+fiscal"),
            Trail::Calculation,
        ),
        (
            compile(
                r"\blei\b|\bdecreto|\blc\s*\d|\bec\s*\d|\bibs\b|\bcbs\b|\bis\s+imposto|reforma\s+tributaria|\bconvenio|\bconfaz\b|\bsinief\b|\bcotepe\b|jurisprudencia|\bparecer|\bart\.\s*\d",
            ),
            Trail::Legislation,
        ),
        (
            compile(r"\bschemas?\b|\bxsd\b|\bxml\b|\btags?\b|\bcampo\s+\w+|\bleiaute|\blayout"),
            Trail::Document,
        ),
        (
            compile(r"integracao|\bapi\b|web\s*service|autorizacao|\benvio\b|consulta\s+recibo"),
            Trail::Integration,
        ),
        (
            compile(r"validacao|rejeicao|codigo\s+de\s+erro|validador"),
            Trail::Validation,
        ),
        (
            compile(
                r"\beventos?\b|carta\s+de\s+correcao|manifestacao|\bepec\b|cancelamento|\bcancelar\b|inutilizacao",
            ),
            Trail::Event,
        ),
        (
            compile(r"a\s+partir\s+de|vigencia|\bprazos?\b|transicao|\b(2026|2027|2033)\b|timeline"),
            Trail::History,
        ),
    ]
});

static NFE_MODEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"nf-?e\s+modelo\s*55|modelo\s*55|\bnfe\s+55\b|nota\s+fiscal\s+eletronica\s+55")
});
static NFE_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"\bnf-?e\b"));
static NFCE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\bnfc-?e\b|\bnf-c-e\b|modelo\s*65|\bnf\s+e\s+consumidor"));

/// Family/document-type rules after the NF-e/NFC-e split, in priority order.
static DOC_TYPE_RULES: LazyLock<Vec<(Regex, DocType)>> = LazyLock::new(|| {
    vec![
        (
            compile(r"\bct-?e\b|conhecimento\s+de\s+transporte"),
            DocType::Cte,
        ),
        (compile(r"\bmdf-?e\b|manifesto\s+eletronico"), DocType::Mdfe),
        (compile(r"\bbp-?e\b|bilhete\s+de\s+passagem"), DocType::Bpe),
        (compile(r"\bnf-?3-?e\b"), DocType::Nf3e),
        (compile(r"\bnf-?com\b"), DocType::Nfcom),
        (compile(r"\bnf-?gas\b"), DocType::Nfgas),
        (compile(r"\bnf-?ag\b"), DocType::Nfag),
        (compile(r"\bdc-?e\b|declaracao|declaracoes"), DocType::Dce),
        (compile(r"\bnff\b"), DocType::Nff),
        (compile(r"\bpes\b"), DocType::Pes),
        (compile(r"\bcff\b"), DocType::Cff),
        (compile(r"\bone\b"), DocType::One),
        (compile(r"\bdifal\b"), DocType::Difal),
        (compile(r"\bnf-?eab\b"), DocType::Nfeab),
    ]
});

static UF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"\b(AC|AL|AP|AM|BA|CE|DF|ES|GO|MA|MT|MS|MG|PA|PB|PR|PE|PI|RJ|RN|RS|RO|RR|SC|SP|SE|TO)\b",
    )
});

/// Classify a question into a [`QuestionIntent`]. Never fails.
pub fn classify_question(question: &str) -> QuestionIntent {
    let folded = fold(question.trim());

    let trail = detect_trail(&folded);
    let doc_type = detect_doc_type(&folded);
    let uf = detect_uf(question);

    let intent = QuestionIntent {
        trail,
        family: doc_type.map(|d| d.family()),
        doc_type,
        uf,
    };

    info!(
        trail = %intent.trail,
        family = intent.family.map(|f| f.as_str()),
        doc_type = intent.doc_type.map(|d| d.as_str()),
        uf = intent.uf.as_deref(),
        "triage classification"
    );

    intent
}

fn detect_trail(folded: &str) -> Trail {
    TRAIL_RULES
        .iter()
        .find(|(re, _)| re.is_match(folded))
        .map(|(_, trail)| *trail)
        .unwrap_or(Trail::Document)
}

/// Document type named in already-folded text.
pub(crate) fn detect_doc_type(folded: &str) -> Option<DocType> {
    let nfce = NFCE_RE.is_match(folded);
    if NFE_MODEL_RE.is_match(folded) || (NFE_RE.is_match(folded) && !nfce) {
        return Some(DocType::Nfe);
    }
    if nfce {
        return Some(DocType::Nfce);
    }
    DOC_TYPE_RULES
        .iter()
        .find(|(re, _)| re.is_match(folded))
        .map(|(_, doc_type)| *doc_type)
}

fn detect_uf(question: &str) -> Option<String> {
    UF_RE
        .captures(question)
        .map(|caps| caps[1].to_string())
}

/// Family implied by a document type, when one was detected.
pub fn family_of(intent: &QuestionIntent) -> Option<Family> {
    intent.family.or_else(|| intent.doc_type.map(|d| d.family()))
}
