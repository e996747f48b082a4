//! Topology cache: every server of a registry, read through its own
//! connection.

use crate::ads::AdsContext;
use crate::directory::{ConnectionTarget, Connector, Directory};
use crate::server_config::read_server_descriptor;
use dsrepl_topology::{Registry, ServerDescriptor, TopologySnapshot};
use tracing::{debug, warn};

/// A snapshot plus the servers that could not be read.
#[derive(Debug, Clone, Default)]
pub struct TopologyCache {
    pub snapshot: TopologySnapshot,
    pub errors: Vec<String>,
}

impl TopologyCache {
    /// A cache holding only the servers already read.
    pub fn of(servers: &[&ServerDescriptor]) -> Self {
        Self {
            snapshot: TopologySnapshot::new(servers.iter().map(|s| (*s).clone()).collect()),
            errors: Vec::new(),
        }
    }

    /// Read every registered server. Servers in `known` are reused instead
    /// of being read again; `template` carries the credentials for the rest.
    pub async fn load(
        registry: &Registry,
        connector: &dyn Connector,
        template: &ConnectionTarget,
        known: &[&ServerDescriptor],
    ) -> Self {
        let mut cache = Self::of(known);
        for props in &registry.servers {
            if cache.snapshot.server(&props.id).is_some() {
                continue;
            }
            let target = template.for_server(&props.host, props.admin_port);
            let read = async {
                let dir = connector.connect(&target).await.map_err(|e| e.to_string())?;
                let descriptor = read_server_descriptor(&*dir, &props.host, props.admin_port)
                    .await
                    .map_err(|e| e.to_string());
                if let Err(e) = dir.close().await {
                    debug!("closing {}: {}", target.address(), e);
                }
                descriptor
            };
            match read.await {
                Ok(server) => {
                    debug!("read {} from the registry", server.id());
                    cache.snapshot.insert(server);
                }
                Err(e) => {
                    warn!("cannot read {}: {}", props.id, e);
                    cache.errors.push(format!("{}: {}", props.id, e));
                }
            }
        }
        cache
    }
}

/// The registry of a server, `None` when it has none.
pub async fn read_registry(dir: &dyn Directory) -> Result<Option<Registry>, crate::directory::DirectoryError> {
    let ads = AdsContext::new(dir);
    if ads.has_admin_data().await? {
        Ok(Some(ads.read_registry().await?))
    } else {
        Ok(None)
    }
}
