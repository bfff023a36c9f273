//! Listing-page parsing: anchors to [`DiscoveredDocument`]s.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use url::Url;

use taxdesk_shared::{DiscoveredDocument, PortalDefinition};

static ANCHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2})/(\d{2})/(\d{4})").expect("valid regex"));

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Parse every document link on a portal listing page.
///
/// A page without usable anchors yields exactly one placeholder document
/// pointing at the listing itself, so each portal reports a heartbeat.
pub fn parse_listing(
    portal: &PortalDefinition,
    base_url: &Url,
    listing_url: &Url,
    html: &str,
) -> Vec<DiscoveredDocument> {
    let doc = Html::parse_document(html);
    let now = Utc::now();
    let mut documents = Vec::new();

    for el in doc.select(&ANCHOR_SEL) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
        {
            continue;
        }
        let Ok(mut resolved) = base_url.join(href) else {
            continue;
        };
        resolved.set_fragment(None);

        let raw = el.inner_html();
        let text = collapse_whitespace(&el.text().collect::<String>());
        let title = if text.is_empty() {
            portal.name.clone()
        } else {
            text
        };
        let url = resolved.to_string();

        let mut document = DiscoveredDocument::new(&portal.id, portal.portal_type, title, url);
        document.content_hash = fingerprint(&portal.id, &document.url, &document.title);
        document.published_at = extract_published_at(&raw).unwrap_or(now);
        document.detected_at = now;
        document.source_listing = Some(listing_url.to_string());
        documents.push(document);
    }

    if documents.is_empty() {
        documents.push(placeholder(portal, listing_url, now));
    }

    documents
}

/// Heartbeat document for a listing with no anchors.
fn placeholder(portal: &PortalDefinition, listing_url: &Url, now: DateTime<Utc>) -> DiscoveredDocument {
    let url = listing_url.to_string();
    let mut document = DiscoveredDocument::new(
        &portal.id,
        portal.portal_type,
        format!("Atualização detectada em {}", portal.name),
        url.clone(),
    );
    document.content_hash = fingerprint(&portal.id, &url, &portal.name);
    document.published_at = now;
    document.detected_at = now;
    document.source_listing = Some(url);
    document
}

/// Hex SHA-256 over `"{portal_id}:{url}:{title}"`.
pub fn fingerprint(portal_id: &str, url: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{portal_id}:{url}:{title}").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First `dd/mm/yyyy` date in `raw`, as UTC midnight.
pub fn extract_published_at(raw: &str) -> Option<DateTime<Utc>> {
    let caps = DATE_RE.captures(raw)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE_RE.replace_all(s, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use taxdesk_shared::PortalType;

    fn portal() -> PortalDefinition {
        PortalDefinition {
            id: "nfe-svrs".into(),
            name: "SVRS - Documentos NF-e".into(),
            base_url: "https://dfe-portal.svrs.rs.gov.br".into(),
            listing_path: "/Nfe/Documentos".into(),
            portal_type: PortalType::National,
        }
    }

    fn urls() -> (Url, Url) {
        let base = Url::parse("https://dfe-portal.svrs.rs.gov.br").unwrap();
        let listing = base.join("/Nfe/Documentos").unwrap();
        (base, listing)
    }

    #[test]
    fn parses_anchors_with_titles_and_dates() {
        let html = r##"<html><body>
            <a href="/Nfe/Documentos/NT2025.001.pdf"><b>Nota Técnica 2025.001</b>
               - publicada em 15/01/2025</a>
            <a href="https://www.nfe.fazenda.gov.br/portal/manual.pdf">Manual   de
               Orientação</a>
            <a href="#top">Topo</a>
            <a href="javascript:void(0)">Imprimir</a>
            <a href="mailto:suporte@sefaz.rs.gov.br">Contato</a>
        </body></html>"##;
        let (base, listing) = urls();
        let docs = parse_listing(&portal(), &base, &listing, html);

        assert_eq!(docs.len(), 2);
        assert_eq!(
            docs[0].url,
            "https://dfe-portal.svrs.rs.gov.br/Nfe/Documentos/NT2025.001.pdf"
        );
        assert_eq!(docs[0].title, "Nota Técnica 2025.001 - publicada em 15/01/2025");
        assert_eq!(docs[0].published_at.year(), 2025);
        assert_eq!(docs[0].published_at.month(), 1);
        assert_eq!(docs[0].published_at.day(), 15);
        assert_eq!(docs[0].published_at.hour(), 0);
        assert_eq!(docs[0].portal_id, "nfe-svrs");
        assert_eq!(
            docs[0].source_listing.as_deref(),
            Some("https://dfe-portal.svrs.rs.gov.br/Nfe/Documentos")
        );
        assert_eq!(docs[1].title, "Manual de Orientação");
        assert_eq!(
            docs[0].content_hash,
            fingerprint("nfe-svrs", &docs[0].url, &docs[0].title)
        );
    }

    #[test]
    fn empty_anchor_text_falls_back_to_portal_name() {
        let html = r#"<a href="/doc.pdf"><img src="icon.png"></a>"#;
        let (base, listing) = urls();
        let docs = parse_listing(&portal(), &base, &listing, html);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "SVRS - Documentos NF-e");
    }

    #[test]
    fn zero_anchors_yield_single_placeholder() {
        let (base, listing) = urls();
        let docs = parse_listing(&portal(), &base, &listing, "<html><p>Sem documentos</p></html>");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "Atualização detectada em SVRS - Documentos NF-e");
        assert_eq!(docs[0].url, listing.to_string());
        assert_eq!(
            docs[0].content_hash,
            fingerprint("nfe-svrs", listing.as_str(), "SVRS - Documentos NF-e")
        );
    }

    #[test]
    fn fingerprint_is_deterministic_and_sensitive() {
        let base = fingerprint("p", "https://x.gov.br/a", "T");
        assert_eq!(base.len(), 64);
        assert_eq!(base, fingerprint("p", "https://x.gov.br/a", "T"));
        assert_ne!(base, fingerprint("q", "https://x.gov.br/a", "T"));
        assert_ne!(base, fingerprint("p", "https://x.gov.br/b", "T"));
        assert_ne!(base, fingerprint("p", "https://x.gov.br/a", "U"));
    }

    #[test]
    fn invalid_dates_are_ignored() {
        assert!(extract_published_at("em 31/02/2025").is_none());
        assert!(extract_published_at("sem data").is_none());
        assert!(extract_published_at("01/12/2024 e 05/01/2025").is_some_and(|d| d.month() == 12));
    }
}
