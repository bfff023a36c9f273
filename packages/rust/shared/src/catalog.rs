//! Portal and partition catalogs.
//!
//! Both catalogs are loaded once from TOML files into a [`CatalogStore`] that is
//! shared (`Arc<CatalogStore>`) by every component needing registry lookups.
//! Readers take an `Arc<Catalogs>` snapshot; [`CatalogStore::reload`] swaps the
//! whole snapshot at once.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Deserialize;

use crate::error::{Result, TaxDeskError};
use crate::types::{PartitionDescriptor, PortalDefinition};

/// Partition catalog shipped with the repository.
pub const BUILTIN_PARTITIONS: &str = include_str!("../../../../catalog/partitions.toml");

/// Portal catalog shipped with the repository.
pub const BUILTIN_PORTALS: &str = include_str!("../../../../catalog/portals.toml");

#[derive(Debug, Deserialize)]
struct PartitionsFile {
    #[serde(default)]
    partitions: Vec<PartitionDescriptor>,
}

#[derive(Debug, Deserialize)]
struct PortalsFile {
    #[serde(default)]
    portals: Vec<PortalDefinition>,
}

/// An immutable, validated pair of catalogs.
#[derive(Debug, Clone, Default)]
pub struct Catalogs {
    /// Portals in declaration order.
    pub portals: Vec<PortalDefinition>,
    /// Partitions in declaration order. The index is the tie-break key for scoring.
    pub partitions: Vec<PartitionDescriptor>,
}

impl Catalogs {
    /// Validate and assemble catalogs. Empty or duplicate ids are rejected.
    pub fn new(portals: Vec<PortalDefinition>, partitions: Vec<PartitionDescriptor>) -> Result<Self> {
        check_ids("portal", portals.iter().map(|p| p.id.as_str()))?;
        check_ids("partition", partitions.iter().map(|p| p.id.as_str()))?;
        Ok(Self {
            portals,
            partitions,
        })
    }

    /// Parse both catalogs from TOML text.
    pub fn parse(portals_toml: &str, partitions_toml: &str) -> Result<Self> {
        let portals: PortalsFile = toml::from_str(portals_toml)
            .map_err(|e| TaxDeskError::config(format!("invalid portal catalog: {e}")))?;
        let partitions: PartitionsFile = toml::from_str(partitions_toml)
            .map_err(|e| TaxDeskError::config(format!("invalid partition catalog: {e}")))?;
        Self::new(portals.portals, partitions.partitions)
    }

    /// Read and parse both catalog files.
    pub fn load(portals_path: &Path, partitions_path: &Path) -> Result<Self> {
        let portals =
            std::fs::read_to_string(portals_path).map_err(|e| TaxDeskError::io(portals_path, e))?;
        let partitions = std::fs::read_to_string(partitions_path)
            .map_err(|e| TaxDeskError::io(partitions_path, e))?;
        Self::parse(&portals, &partitions)
    }

    /// The catalogs shipped in `catalog/`.
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_PORTALS, BUILTIN_PARTITIONS)
    }
}

fn check_ids<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(TaxDeskError::config(format!("{kind} catalog contains an empty id")));
        }
        if !seen.insert(id) {
            return Err(TaxDeskError::config(format!(
                "{kind} catalog contains duplicate id '{id}'"
            )));
        }
    }
    Ok(())
}

/// Where a [`CatalogStore`] reloads from.
#[derive(Debug, Clone)]
enum CatalogSource {
    Files {
        portals: PathBuf,
        partitions: PathBuf,
    },
    Builtin,
    Memory,
}

/// Cached catalogs with explicit reload.
#[derive(Debug)]
pub struct CatalogStore {
    source: CatalogSource,
    current: RwLock<Arc<Catalogs>>,
}

impl CatalogStore {
    /// Load catalogs from files. Fails on missing files, malformed TOML or bad ids.
    pub fn open(portals_path: impl Into<PathBuf>, partitions_path: impl Into<PathBuf>) -> Result<Self> {
        let portals = portals_path.into();
        let partitions = partitions_path.into();
        let catalogs = Catalogs::load(&portals, &partitions)?;
        tracing::info!(
            portals = catalogs.portals.len(),
            partitions = catalogs.partitions.len(),
            "loaded catalogs"
        );
        Ok(Self {
            source: CatalogSource::Files {
                portals,
                partitions,
            },
            current: RwLock::new(Arc::new(catalogs)),
        })
    }

    /// Use the catalogs shipped with the repository.
    pub fn builtin() -> Result<Self> {
        Ok(Self {
            source: CatalogSource::Builtin,
            current: RwLock::new(Arc::new(Catalogs::builtin()?)),
        })
    }

    /// Build a store from in-memory entries. `reload` keeps them unchanged.
    pub fn from_parts(
        portals: Vec<PortalDefinition>,
        partitions: Vec<PartitionDescriptor>,
    ) -> Result<Self> {
        Ok(Self {
            source: CatalogSource::Memory,
            current: RwLock::new(Arc::new(Catalogs::new(portals, partitions)?)),
        })
    }

    /// Re-read the catalog source and swap the snapshot. On error the previous
    /// snapshot stays in place.
    pub fn reload(&self) -> Result<()> {
        let fresh = match &self.source {
            CatalogSource::Files {
                portals,
                partitions,
            } => Catalogs::load(portals, partitions)?,
            CatalogSource::Builtin => Catalogs::builtin()?,
            CatalogSource::Memory => return Ok(()),
        };
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(fresh);
        tracing::debug!("catalogs reloaded");
        Ok(())
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<Catalogs> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn is_valid_partition_id(&self, id: &str) -> bool {
        self.partition_index(id).is_some()
    }

    /// Declaration index of a partition.
    pub fn partition_index(&self, id: &str) -> Option<usize> {
        self.snapshot().partitions.iter().position(|p| p.id == id)
    }

    pub fn list_partitions(&self) -> Vec<PartitionDescriptor> {
        self.snapshot().partitions.clone()
    }

    pub fn list_portals(&self) -> Vec<PortalDefinition> {
        self.snapshot().portals.clone()
    }

    pub fn portal(&self, id: &str) -> Option<PortalDefinition> {
        self.snapshot().portals.iter().find(|p| p.id == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PortalType;

    fn partition(id: &str) -> PartitionDescriptor {
        PartitionDescriptor {
            id: id.into(),
            description: format!("{id} description"),
        }
    }

    #[test]
    fn builtin_catalogs_parse() {
        let store = CatalogStore::builtin().expect("builtin catalogs");
        let partitions = store.list_partitions();
        assert_eq!(partitions.len(), 12);
        assert_eq!(partitions[0].id, "vs_specs_mercadorias");
        assert!(store.is_valid_partition_id("vs_tabelas_fiscais"));
        assert!(!store.is_valid_partition_id("tabelas-cfop"));
        assert!(!store.list_portals().is_empty());
    }

    #[test]
    fn duplicate_partition_ids_rejected() {
        let err = CatalogStore::from_parts(vec![], vec![partition("vs_a"), partition("vs_a")])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate id 'vs_a'"));
    }

    #[test]
    fn empty_partition_id_rejected() {
        let err = CatalogStore::from_parts(vec![], vec![partition(" ")]).unwrap_err();
        assert!(matches!(err, TaxDeskError::Config { .. }));
    }

    #[test]
    fn malformed_catalog_is_config_error() {
        let err = Catalogs::parse("[[portals]]\nid = 1", "").unwrap_err();
        assert!(err.to_string().starts_with("config error"));
    }

    #[test]
    fn partition_index_follows_declaration_order() {
        let store =
            CatalogStore::from_parts(vec![], vec![partition("vs_b"), partition("vs_a")]).unwrap();
        assert_eq!(store.partition_index("vs_b"), Some(0));
        assert_eq!(store.partition_index("vs_a"), Some(1));
        assert_eq!(store.partition_index("vs_c"), None);
    }

    #[test]
    fn reload_picks_up_file_changes() {
        let dir = std::env::temp_dir().join(format!("taxdesk_catalog_{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let portals = dir.join("portals.toml");
        let partitions = dir.join("partitions.toml");
        std::fs::write(
            &portals,
            r#"
[[portals]]
id = "nfe"
name = "Portal NF-e"
base_url = "https://www.nfe.fazenda.gov.br"
listing_path = "/portal/listaConteudo.aspx"
type = "nacional"
"#,
        )
        .unwrap();
        std::fs::write(&partitions, "[[partitions]]\nid = \"vs_a\"\ndescription = \"a\"\n").unwrap();

        let store = CatalogStore::open(&portals, &partitions).unwrap();
        assert_eq!(store.list_partitions().len(), 1);
        assert_eq!(store.portal("nfe").unwrap().portal_type, PortalType::National);

        std::fs::write(
            &partitions,
            "[[partitions]]\nid = \"vs_a\"\ndescription = \"a\"\n\n[[partitions]]\nid = \"vs_b\"\ndescription = \"b\"\n",
        )
        .unwrap();
        let before = store.snapshot();
        store.reload().unwrap();
        assert_eq!(before.partitions.len(), 1);
        assert!(store.is_valid_partition_id("vs_b"));

        std::fs::write(&partitions, "not toml [[").unwrap();
        assert!(store.reload().is_err());
        assert!(store.is_valid_partition_id("vs_b"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
