//! Source planner: intent to a bounded, ordered list of partition ids.

use tracing::info;

use taxdesk_shared::{CatalogStore, Family, MAX_PARTITIONS_PER_QUERY, QuestionIntent, Trail};

use crate::triage::family_of;

/// Ordered, deduplicated, registry-validated partitions for `intent`, at most
/// [`MAX_PARTITIONS_PER_QUERY`] long. An empty plan is valid.
pub fn plan_partitions(intent: &QuestionIntent, catalog: &CatalogStore) -> Vec<String> {
    let mut planned: Vec<String> = Vec::new();
    for id in candidates(intent) {
        if planned.iter().any(|p| p == id) || !catalog.is_valid_partition_id(id) {
            continue;
        }
        planned.push(id.to_string());
        if planned.len() == MAX_PARTITIONS_PER_QUERY {
            break;
        }
    }

    info!(trail = %intent.trail, planned = ?planned, "source plan");
    planned
}

/// Unfiltered candidate list for `intent`, in priority order.
fn candidates(intent: &QuestionIntent) -> Vec<&'static str> {
    match intent.trail {
        Trail::Calculation => vec!["vs_tabelas_fiscais", "vs_legal_federal", "vs_legal_estados"],
        Trail::Legislation => {
            let mut ids = vec![
                "vs_legal_federal",
                "vs_legal_confaz",
                "vs_legal_estados",
                "vs_jurisprudencia",
            ];
            // A named state re-adds state legislation; dedup keeps its first
            // position, so the order matches the plan without a state.
            if intent.uf.is_some() {
                ids.push("vs_legal_estados");
            }
            ids
        }
        Trail::History => vec![
            "vs_changelog_normativo",
            "vs_legal_federal",
            "vs_specs_mercadorias",
        ],
        Trail::Document
        | Trail::Integration
        | Trail::Validation
        | Trail::Event
        | Trail::Operation => by_family(intent),
    }
}

fn by_family(intent: &QuestionIntent) -> Vec<&'static str> {
    match family_of(intent) {
        Some(Family::Mercadorias) => vec!["vs_specs_mercadorias", "vs_schemas_xsd", "vs_tabelas_fiscais"],
        Some(Family::Transporte) => vec![
            "vs_specs_transporte",
            "vs_schemas_xsd",
            "vs_tabelas_fiscais",
            "vs_legal_confaz",
        ],
        Some(Family::Utilities) => vec!["vs_specs_utilities", "vs_schemas_xsd"],
        Some(Family::Declaracoes) => vec!["vs_specs_declaracoes", "vs_schemas_xsd"],
        Some(Family::Plataformas) => vec!["vs_specs_plataformas", "vs_schemas_xsd"],
        None => vec![
            "vs_specs_mercadorias",
            "vs_specs_transporte",
            "vs_schemas_xsd",
            "vs_tabelas_fiscais",
            "vs_legal_federal",
        ],
    }
}
