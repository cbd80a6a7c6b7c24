use crate::error::StoreError;
use crate::storage::{NetworkFilter, ReadTx, WriteTx};
use crate::types::Network;

/// Read-only network lookups needed to resolve a network reference.
pub trait NetworkLookup {
    fn get_network(&self, id: &str) -> Result<Option<Network>, StoreError>;

    fn find_networks_by_name(&self, name: &str) -> Result<Vec<Network>, StoreError>;
}

impl NetworkLookup for ReadTx<'_> {
    fn get_network(&self, id: &str) -> Result<Option<Network>, StoreError> {
        ReadTx::get_network(self, id)
    }

    fn find_networks_by_name(&self, name: &str) -> Result<Vec<Network>, StoreError> {
        self.find_networks(&NetworkFilter::ByName(name.to_string()))
    }
}

impl NetworkLookup for WriteTx<'_> {
    fn get_network(&self, id: &str) -> Result<Option<Network>, StoreError> {
        ReadTx::get_network(self, id)
    }

    fn find_networks_by_name(&self, name: &str) -> Result<Vec<Network>, StoreError> {
        self.find_networks(&NetworkFilter::ByName(name.to_string()))
    }
}

/// Resolve `target` as a network ID, falling back to the first network
/// whose name equals `target`.
pub fn resolve_network<L>(lookup: &L, target: &str) -> Result<Option<Network>, StoreError>
where
    L: NetworkLookup + ?Sized,
{
    if let Some(network) = lookup.get_network(target)? {
        return Ok(Some(network));
    }

    Ok(lookup.find_networks_by_name(target)?.into_iter().next())
}
