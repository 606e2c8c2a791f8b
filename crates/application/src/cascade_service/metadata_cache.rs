use std::collections::HashMap;

use tokio::sync::RwLock;

use super::*;

/// Process-wide cache of target field metadata.
///
/// Entries are written once per key; concurrent writers keep the first value.
#[derive(Debug, Default)]
pub struct FieldMetadataCache {
    entries: RwLock<HashMap<(String, String), Option<FieldMetadata>>>,
}

impl FieldMetadataCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached lookup result; the outer `None` means not cached yet.
    pub async fn get(
        &self,
        entity_logical_name: &str,
        field_logical_name: &str,
    ) -> Option<Option<FieldMetadata>> {
        self.entries
            .read()
            .await
            .get(&(entity_logical_name.to_owned(), field_logical_name.to_owned()))
            .cloned()
    }

    /// Inserts a lookup result unless one is already cached and returns the stored value.
    pub async fn insert_if_absent(
        &self,
        entity_logical_name: &str,
        field_logical_name: &str,
        metadata: Option<FieldMetadata>,
    ) -> Option<FieldMetadata> {
        self.entries
            .write()
            .await
            .entry((entity_logical_name.to_owned(), field_logical_name.to_owned()))
            .or_insert(metadata)
            .clone()
    }

    /// Returns the number of cached keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl CascadeService {
    /// Looks up target field metadata through the cache.
    ///
    /// Lookup failures are logged and not cached.
    pub(super) async fn target_field_metadata(
        &self,
        entity_logical_name: &str,
        field_logical_name: &str,
        diagnostics: &Diagnostics,
    ) -> Option<FieldMetadata> {
        if let Some(cached) = self
            .metadata_cache
            .get(entity_logical_name, field_logical_name)
            .await
        {
            return cached;
        }

        match self
            .record_store
            .field_metadata(entity_logical_name, field_logical_name)
            .await
        {
            Ok(metadata) => {
                self.metadata_cache
                    .insert_if_absent(entity_logical_name, field_logical_name, metadata)
                    .await
            }
            Err(error) => {
                diagnostics.warning(format!(
                    "metadata lookup for '{entity_logical_name}.{field_logical_name}' failed, passing value through: {error}"
                ));
                None
            }
        }
    }
}
