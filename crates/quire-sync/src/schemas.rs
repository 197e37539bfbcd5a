//! Schema id cache and decode layout registry

use std::sync::Arc;

use dashmap::DashMap;
use quire_core::{ChainClient, SchemaDescriptor, SchemaId};
use tracing::debug;

use crate::decode::SchemaLayout;
use crate::error::{SyncError, SyncResult};

/// Maps descriptors to ids (forever) and ids to decode layouts
pub struct SchemaCatalog {
    chain: Arc<dyn ChainClient>,
    ids: DashMap<SchemaDescriptor, SchemaId>,
    layouts: DashMap<SchemaId, Arc<SchemaLayout>>,
}

impl SchemaCatalog {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            ids: DashMap::new(),
            layouts: DashMap::new(),
        }
    }

    /// Id of `descriptor`, computed once per descriptor
    pub async fn schema_id(&self, descriptor: &SchemaDescriptor) -> SyncResult<SchemaId> {
        if let Some(id) = self.ids.get(descriptor) {
            return Ok(id.value().clone());
        }
        let id = self.chain.compute_schema_id(descriptor).await?;
        debug!(schema = %id, descriptor = %descriptor, "Computed schema id");
        self.ids.insert(descriptor.clone(), id.clone());
        Ok(id)
    }

    /// Compute the id of `descriptor` and bind a decode layout to it
    ///
    /// Without an explicit layout, one is derived from the descriptor.
    pub async fn register(
        &self,
        descriptor: &SchemaDescriptor,
        layout: Option<SchemaLayout>,
    ) -> SyncResult<SchemaId> {
        let layout = match layout {
            Some(layout) => layout,
            None => SchemaLayout::from_descriptor(descriptor)?,
        };
        let id = self.schema_id(descriptor).await?;
        self.layouts.insert(id.clone(), Arc::new(layout));
        Ok(id)
    }

    /// Layout bound to `id`
    pub fn layout(&self, id: &SchemaId) -> SyncResult<Arc<SchemaLayout>> {
        self.layouts
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SyncError::UnknownSchema(id.to_string()))
    }

    pub fn is_registered(&self, id: &SchemaId) -> bool {
        self.layouts.contains_key(id)
    }
}

impl std::fmt::Debug for SchemaCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCatalog")
            .field("ids", &self.ids.len())
            .field("layouts", &self.layouts.len())
            .finish()
    }
}
