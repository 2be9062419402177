//! Endpoint catalog: which addresses belong to which cloud and datacenter.
//!
//! The catalog is data. A built-in copy ships with the binary and a config
//! file may replace it wholesale; either way it is turned into
//! [`ServiceGroup`]s before the probe engine sees it.

use serde::{Deserialize, Serialize};

use crate::config::{CloudSelection, Config, DatacenterSelection};
use crate::error::{AppError, Result};
use crate::probe::{Credentials, ProbeTarget, ServiceGroup, TargetKind};

const BUILTIN_CATALOG: &str = include_str!("builtin.toml");

/// Cloud tag of raw TCP entries; probed only on request
pub const TCP_CLOUD: &str = "tcp";
/// Cloud tag of general internet sites; probed only when every cloud is selected
pub const PUBLIC_CLOUD: &str = "public";
/// Datacenter tag matching every datacenter selection
pub const ALL_DATACENTERS: &str = "all";

const USERNAME_PLACEHOLDER: &str = "{username}";

/// One catalog row: a list of addresses probed the same way
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub cloud: String,
    pub datacenter: String,
    pub kind: TargetKind,
    pub addresses: Vec<String>,
    /// Credential profile supplying `{username}` and Basic auth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    entries: Vec<CatalogEntry>,
}

/// What the user asked to probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub cloud: CloudSelection,
    pub datacenter: DatacenterSelection,
    pub include_tcp: bool,
}

impl Selection {
    pub fn matches(&self, entry: &CatalogEntry) -> bool {
        let cloud = entry.cloud.to_lowercase();
        let cloud_ok = if cloud == TCP_CLOUD {
            self.include_tcp
        } else if cloud == PUBLIC_CLOUD {
            self.cloud == CloudSelection::All
        } else {
            match self.cloud {
                CloudSelection::All => true,
                selected => cloud == selected.to_string(),
            }
        };

        let datacenter = entry.datacenter.to_lowercase();
        let datacenter_ok = self.datacenter == DatacenterSelection::All
            || datacenter == ALL_DATACENTERS
            || datacenter == self.datacenter.to_string();

        cloud_ok && datacenter_ok
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_CATALOG)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content)?;
        Ok(Self {
            entries: file.entries,
        })
    }

    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// The config's catalog when it has one, otherwise the built-in one.
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.catalog.is_empty() {
            Self::builtin()
        } else {
            Ok(Self::from_entries(config.catalog.clone()))
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Turn the selected entries into service groups, in catalog order.
    ///
    /// Entries that need a credential profile `lookup` cannot supply are
    /// skipped with a warning rather than probed with a broken URL.
    pub fn build_groups<F>(&self, selection: &Selection, lookup: F) -> Vec<ServiceGroup>
    where
        F: Fn(&str) -> Option<Credentials>,
    {
        let mut groups = Vec::new();

        for entry in self.entries.iter().filter(|e| selection.matches(e)) {
            let credentials = match &entry.credentials {
                Some(profile) => match lookup(profile) {
                    Some(creds) => Some(creds),
                    None => {
                        tracing::warn!(
                            profile = %profile,
                            cloud = %entry.cloud,
                            datacenter = %entry.datacenter,
                            "Credentials not found. Not running these REST endpoint tests."
                        );
                        continue;
                    }
                },
                None => None,
            };

            let mut group = ServiceGroup::new(&entry.cloud, &entry.datacenter);
            for address in &entry.addresses {
                let address = match &credentials {
                    Some(creds) => address.replace(USERNAME_PLACEHOLDER, &creds.username),
                    None => address.clone(),
                };
                let mut target = ProbeTarget::new(entry.kind, address);
                if entry.kind == TargetKind::HttpGetAuthenticated {
                    target.credentials = credentials.clone();
                }
                group.targets.push(target);
            }
            groups.push(group);
        }

        groups
    }
}

impl std::str::FromStr for Catalog {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_toml(s)
    }
}
