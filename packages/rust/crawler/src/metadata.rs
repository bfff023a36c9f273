//! Best-effort metadata inference for discovered documents.
//!
//! Every check is keyword based and cheap; nothing here fetches the document.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use taxdesk_shared::text::fold;
use taxdesk_shared::{DiscoveredDocument, Natureza};

/// Document-type path segments, most specific first.
const DOMAIN_SEGMENTS: [&str; 17] = [
    "nfcom", "nfce", "nf3e", "nfgas", "nfag", "nfeab", "nff", "cff", "pes", "one", "difal",
    "dce", "bpe", "mdfe", "cte", "nfe", "confaz",
];

/// Generic keyword checks over folded path + title, used when no segment matched.
static DOMAIN_KEYWORDS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\bnfcom\b", "nfcom"),
        (r"\bnfc-?e\b|\bmodelo 65\b", "nfce"),
        (r"\bnf3-?e\b", "nf3e"),
        (r"\bnfgas\b", "nfgas"),
        (r"\bnfag\b", "nfag"),
        (r"\bnfeab\b", "nfeab"),
        (r"\bdc-?e\b", "dce"),
        (r"\bbp-?e\b", "bpe"),
        (r"\bmdf-?e\b", "mdfe"),
        (r"\bct-?e\b|\bmodelo 57\b", "cte"),
        (r"\bnf-?e\b|\bmodelo 55\b", "nfe"),
        (r"\b(confaz|sinief|cotepe)\b", "confaz"),
    ]
    .into_iter()
    .map(|(pattern, domain)| (Regex::new(pattern).expect("valid regex"), domain))
    .collect()
});

static NATUREZA_KEYWORDS: LazyLock<Vec<(Regex, Natureza)>> = LazyLock::new(|| {
    [
        (r"\bnota tecnica\b|\bnt\s?\d{4}", Natureza::NotaTecnica),
        (r"\bmanua(l|is)\b", Natureza::Manual),
        (r"\btabelas?\b", Natureza::Tabela),
        (r"\binformes? tecnicos?\b", Natureza::InformeTecnico),
        (r"\b(schemas?|esquemas?|xsd)\b", Natureza::SchemaXml),
        (r"\bajustes? sinief\b", Natureza::AjusteSinief),
        (r"\bconvenios?\b", Natureza::Convenio),
        (r"\bato cotepe\b", Natureza::AtoCotepe),
        (r"\blei\b|\blei complementar\b|\blcp?\s?\d+", Natureza::Lei),
        (r"\bdecretos?\b", Natureza::Decreto),
    ]
    .into_iter()
    .map(|(pattern, natureza)| (Regex::new(pattern).expect("valid regex"), natureza))
    .collect()
});

static REFORM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\breforma tributaria\b").expect("valid regex"));
static IBS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bibs\b").expect("valid regex"));
static CBS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bcbs\b").expect("valid regex"));
// Upper-case only: lower-case "is" is too common in mixed-language titles.
static IS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bIS\b").expect("valid regex"));

static EXTENSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[A-Za-z0-9]{1,5}$").expect("valid regex"));

/// Fill the enrichment fields a document does not already carry.
pub fn enrich(doc: &mut DiscoveredDocument) {
    let path = Url::parse(&doc.url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();

    if doc.domain.is_none() {
        doc.domain = infer_domain(&path, &doc.title).map(str::to_string);
    }
    if doc.file_name.is_none() {
        doc.file_name = file_name_from_path(&path);
    }
    if doc.natureza.is_none() {
        let haystack = format!(
            "{} {} {}",
            doc.title,
            path,
            doc.file_name.as_deref().unwrap_or("")
        );
        doc.natureza = infer_natureza(&haystack);
    }
    if doc.assuntos.is_empty() {
        doc.assuntos = infer_assuntos(&format!("{} {}", doc.title, path));
    }
    if doc.modelo.is_none() {
        doc.modelo = doc
            .domain
            .as_deref()
            .and_then(modelo_for_domain)
            .map(str::to_string);
    }
}

/// Document type from URL path segments, then from keywords in path and title.
pub fn infer_domain(path: &str, title: &str) -> Option<&'static str> {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect();

    if let Some(domain) = DOMAIN_SEGMENTS
        .iter()
        .find(|known| segments.iter().any(|s| s.as_str() == **known))
    {
        return Some(*domain);
    }

    let haystack = fold(&format!("{path} {title}"));
    DOMAIN_KEYWORDS
        .iter()
        .find(|(re, _)| re.is_match(&haystack))
        .map(|(_, domain)| *domain)
}

/// Nature of the document from ordered keyword checks.
pub fn infer_natureza(text: &str) -> Option<Natureza> {
    let folded = fold(text);
    NATUREZA_KEYWORDS
        .iter()
        .find(|(re, _)| re.is_match(&folded))
        .map(|(_, natureza)| *natureza)
}

/// Tax-reform subjects mentioned in `text`.
pub fn infer_assuntos(text: &str) -> Vec<String> {
    let folded = fold(text);
    let ibs = IBS_RE.is_match(&folded);
    let cbs = CBS_RE.is_match(&folded);
    let is = IS_RE.is_match(text);

    let mut assuntos = Vec::new();
    if REFORM_RE.is_match(&folded) || ibs || cbs || is {
        assuntos.push("REFORMA_TRIBUTARIA".to_string());
    }
    if ibs {
        assuntos.push("IBS".to_string());
    }
    if cbs {
        assuntos.push("CBS".to_string());
    }
    if is {
        assuntos.push("IS".to_string());
    }
    assuntos
}

/// Fiscal model number of a document type.
pub fn modelo_for_domain(domain: &str) -> Option<&'static str> {
    match domain {
        "nfe" => Some("55"),
        "nfce" => Some("65"),
        "cte" => Some("57"),
        "mdfe" => Some("58"),
        "bpe" => Some("63"),
        "nf3e" => Some("66"),
        "nfcom" => Some("62"),
        _ => None,
    }
}

fn file_name_from_path(path: &str) -> Option<String> {
    let last = path.rsplit('/').next()?;
    if EXTENSION_RE.is_match(last) && last.len() > 1 {
        Some(last.to_string())
    } else {
        None
    }
}
