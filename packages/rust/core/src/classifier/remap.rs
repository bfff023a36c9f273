//! Compatibility mapping from retired partition ids to current ones.
//!
//! Models trained on the old store names keep answering with them; these are
//! translated before the id is validated against the catalog.

/// Bumped whenever [`LEGACY_IDS`] or [`LEGACY_PREFIXES`] change.
pub const LEGACY_TABLE_VERSION: u32 = 1;

/// Exact retired ids, checked before the prefix rules.
pub const LEGACY_IDS: &[(&str, &str)] = &[
    ("normas-tecnicas-nfe-nfce-cte", "vs_specs_mercadorias"),
    ("legislacao-nacional-ibs-cbs-is", "vs_legal_federal"),
    ("documentos-estaduais-ibc-cbs", "vs_legal_estados"),
    ("documentos-estaduais-ibs-cbs", "vs_legal_estados"),
    ("jurisprudencia-tributaria", "vs_jurisprudencia"),
    ("normas-tecnicas-cte", "vs_specs_transporte"),
    ("normas-tecnicas-mdfe", "vs_specs_transporte"),
    ("manuais-cte", "vs_specs_transporte"),
    ("manuais-mdfe", "vs_specs_transporte"),
    ("manuais-bpe", "vs_specs_transporte"),
    ("changelog-normativo", "vs_changelog_normativo"),
];

/// Retired id prefixes, in priority order.
pub const LEGACY_PREFIXES: &[(&str, &str)] = &[
    ("esquemas-xml-", "vs_schemas_xsd"),
    ("schemas-", "vs_schemas_xsd"),
    ("xsd-", "vs_schemas_xsd"),
    ("tabelas-", "vs_tabelas_fiscais"),
    ("normas-tecnicas-", "vs_specs_mercadorias"),
    ("manuais-", "vs_specs_mercadorias"),
    ("informes-tecnicos-", "vs_specs_mercadorias"),
    ("legislacao-", "vs_legal_federal"),
    ("ajustes-sinief-", "vs_legal_confaz"),
];

/// Current id for a retired one, or `None` when `id` is not a known legacy name.
pub fn remap_legacy_id(id: &str) -> Option<&'static str> {
    let id = id.trim().to_lowercase();
    LEGACY_IDS
        .iter()
        .find(|(legacy, _)| *legacy == id)
        .or_else(|| {
            LEGACY_PREFIXES
                .iter()
                .find(|(prefix, _)| id.starts_with(prefix))
        })
        .map(|(_, current)| *current)
}
