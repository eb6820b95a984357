use std::sync::Arc;

use crate::catalog::code::CodeGenerator;
use crate::db::ItemStore;
use crate::error::{AppError, AppResult};
use crate::models::{ItemFields, ItemFilter, ItemModel, ItemStatus, NewItem};

/// Item catalog: creation with a generated code, status transitions by
/// code, and the remaining item operations over an [`ItemStore`].
pub struct Catalog {
    store: Arc<dyn ItemStore>,
    codes: CodeGenerator,
}

impl Catalog {
    pub fn new(store: Arc<dyn ItemStore>, codes: CodeGenerator) -> Self {
        Self { store, codes }
    }

    /// Creates an item. The code is generated here, before the first
    /// insert, and a collision detected by the store triggers a fresh code.
    pub async fn create_item(&self, fields: ItemFields) -> AppResult<ItemModel> {
        fields.validate()?;

        loop {
            let code = self.codes.generate_unique(self.store.as_ref()).await?;
            let new_item = NewItem {
                code,
                fields: fields.clone(),
            };
            match self.store.insert(new_item).await {
                Ok(item) => {
                    tracing::info!("Created item id={} code={}", item.id, item.code);
                    return Ok(item);
                }
                Err(AppError::UniquenessViolation(code)) => {
                    tracing::warn!("Item code {} was taken concurrently, retrying", code);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sets the status of the item with exactly this code.
    ///
    /// Validation runs in order: code present, item exists, status valid.
    /// Both directions are allowed, including RESGATADO back to DISPONIVEL.
    pub async fn update_status(&self, code: &str, requested_status: &str) -> AppResult<ItemModel> {
        if code.is_empty() {
            return Err(AppError::MissingParameter("code"));
        }

        let previous = self.store.get(code).await?.status;

        let status: ItemStatus = requested_status
            .parse()
            .map_err(|_| AppError::InvalidStatus(requested_status.to_string()))?;

        let saved = self.store.set_status(code, status).await?;

        tracing::info!(
            "Item {} status changed: {} -> {}",
            saved.code,
            previous,
            saved.status
        );
        Ok(saved)
    }

    /// Replaces the editable fields (and optionally the status) of an item.
    /// The code is kept as assigned at creation.
    pub async fn update_item(
        &self,
        id: i64,
        fields: ItemFields,
        status: Option<&str>,
    ) -> AppResult<ItemModel> {
        fields.validate()?;
        let status = status
            .map(|s| {
                s.parse::<ItemStatus>()
                    .map_err(|_| AppError::InvalidStatus(s.to_string()))
            })
            .transpose()?;

        let mut item = self.store.get_by_id(id).await?;
        item.apply(fields);
        if let Some(status) = status {
            item.status = status;
        }
        self.store.save(&item).await
    }

    pub async fn get_item(&self, id: i64) -> AppResult<ItemModel> {
        self.store.get_by_id(id).await
    }

    pub async fn delete_item(&self, id: i64) -> AppResult<()> {
        self.store.delete(id).await?;
        tracing::info!("Deleted item id={}", id);
        Ok(())
    }

    pub async fn list_items(&self, filter: &ItemFilter) -> AppResult<Vec<ItemModel>> {
        self.store.list(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::code::is_valid_code;
    use crate::db::{CategoryStore, MemoryStore};
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fields(title: &str) -> ItemFields {
        ItemFields {
            title: title.to_string(),
            category_id: None,
            description: "Found in room 101".to_string(),
            photo: Some("items/photo.jpg".to_string()),
            found_on: NaiveDate::from_ymd_opt(2024, 4, 15).unwrap(),
        }
    }

    fn catalog_with(store: Arc<MemoryStore>, seed: u64) -> Catalog {
        Catalog::new(store, CodeGenerator::seeded(seed))
    }

    #[tokio::test]
    async fn test_create_item_assigns_generated_code() {
        let store = Arc::new(MemoryStore::new());
        let catalog = catalog_with(store.clone(), 1);

        let item = catalog.create_item(fields("Glasses")).await.unwrap();
        assert!(is_valid_code(&item.code));
        assert_eq!(item.status, ItemStatus::Available);

        let stored = store.get(&item.code).await.unwrap();
        assert_eq!(stored.id, item.id);
        assert_eq!(stored.title, "Glasses");
    }

    #[tokio::test]
    async fn test_create_item_rejects_missing_title() {
        let catalog = catalog_with(Arc::new(MemoryStore::new()), 1);
        let mut f = fields("x");
        f.title = String::new();
        assert!(matches!(
            catalog.create_item(f).await,
            Err(AppError::MissingParameter("title"))
        ));
    }

    #[tokio::test]
    async fn test_update_status_claims_item() {
        let store = Arc::new(MemoryStore::new());
        let bags = store.create_category("Bags").await.unwrap();
        let catalog = catalog_with(store.clone(), 2);

        let mut f = fields("Backpack");
        f.category_id = Some(bags.id);
        let created = catalog.create_item(f).await.unwrap();

        let updated = catalog
            .update_status(&created.code, "RESGATADO")
            .await
            .unwrap();
        assert_eq!(updated.status, ItemStatus::Claimed);
        assert_eq!(updated.code, created.code);
        assert_eq!(updated.title, created.title);
        assert_eq!(updated.category_id, Some(bags.id));
        assert_eq!(updated.category_name.as_deref(), Some("Bags"));

        let stored = store.get(&created.code).await.unwrap();
        assert_eq!(stored.status, ItemStatus::Claimed);
    }

    #[tokio::test]
    async fn test_update_status_allows_claimed_to_available() {
        let store = Arc::new(MemoryStore::new());
        let catalog = catalog_with(store.clone(), 3);
        let created = catalog.create_item(fields("Watch")).await.unwrap();

        catalog
            .update_status(&created.code, "RESGATADO")
            .await
            .unwrap();
        let reverted = catalog
            .update_status(&created.code, "DISPONIVEL")
            .await
            .unwrap();
        assert_eq!(reverted.status, ItemStatus::Available);
    }

    #[tokio::test]
    async fn test_update_status_missing_code() {
        let catalog = catalog_with(Arc::new(MemoryStore::new()), 4);
        assert!(matches!(
            catalog.update_status("", "RESGATADO").await,
            Err(AppError::MissingParameter("code"))
        ));
        // Missing code wins over an invalid status
        assert!(matches!(
            catalog.update_status("", "FOO").await,
            Err(AppError::MissingParameter("code"))
        ));
    }

    #[tokio::test]
    async fn test_update_status_unknown_code() {
        let catalog = catalog_with(Arc::new(MemoryStore::new()), 5);
        assert!(matches!(
            catalog.update_status("NOPE1234", "RESGATADO").await,
            Err(AppError::NotFound(_))
        ));
        // Not found wins over an invalid status
        assert!(matches!(
            catalog.update_status("NOPE1234", "FOO").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_status_lookup_is_case_sensitive() {
        let store = Arc::new(MemoryStore::new());
        let catalog = catalog_with(store.clone(), 6);
        let created = catalog.create_item(fields("Ring")).await.unwrap();

        let lowered = created.code.to_lowercase();
        if lowered != created.code {
            assert!(matches!(
                catalog.update_status(&lowered, "RESGATADO").await,
                Err(AppError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_update_status_invalid_status_leaves_item_untouched() {
        let store = Arc::new(MemoryStore::new());
        let catalog = catalog_with(store.clone(), 7);
        let created = catalog.create_item(fields("Laptop")).await.unwrap();

        let err = catalog
            .update_status(&created.code, "FOO")
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, AppError::InvalidStatus(_)));
        assert!(msg.contains("DISPONIVEL"));
        assert!(msg.contains("RESGATADO"));

        let stored = store.get(&created.code).await.unwrap();
        assert_eq!(stored.status, ItemStatus::Available);
        assert_eq!(stored.updated_at, created.updated_at);
    }

    #[tokio::test]
    async fn test_update_item_keeps_code() {
        let store = Arc::new(MemoryStore::new());
        let catalog = catalog_with(store.clone(), 8);
        let created = catalog.create_item(fields("Jacket")).await.unwrap();

        let mut f = fields("Red jacket");
        f.photo = None;
        let updated = catalog
            .update_item(created.id, f, Some("RESGATADO"))
            .await
            .unwrap();
        assert_eq!(updated.code, created.code);
        assert_eq!(updated.title, "Red jacket");
        assert_eq!(updated.photo, None);
        assert_eq!(updated.status, ItemStatus::Claimed);

        assert!(matches!(
            catalog.update_item(created.id, fields("x"), Some("LOST")).await,
            Err(AppError::InvalidStatus(_))
        ));
        assert_eq!(store.get(&created.code).await.unwrap().title, "Red jacket");
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let store = Arc::new(MemoryStore::new());
        let catalog = catalog_with(store.clone(), 9);
        let a = catalog.create_item(fields("Umbrella")).await.unwrap();
        let b = catalog.create_item(fields("Notebook")).await.unwrap();

        let by_code = catalog
            .list_items(&ItemFilter {
                code: Some(b.code.clone()),
                search: None,
            })
            .await
            .unwrap();
        assert_eq!(by_code.len(), 1);
        assert_eq!(by_code[0].id, b.id);

        let search = catalog
            .list_items(&ItemFilter {
                code: None,
                search: Some("umbr".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(search.len(), 1);
        assert_eq!(search[0].id, a.id);

        catalog.delete_item(a.id).await.unwrap();
        assert!(matches!(
            catalog.get_item(a.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            catalog.delete_item(a.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    /// Reports every code as free so collisions surface only at insert.
    struct StaleExistsStore {
        inner: MemoryStore,
        inserts: AtomicUsize,
    }

    #[tonic::async_trait]
    impl ItemStore for StaleExistsStore {
        async fn exists(&self, _code: &str) -> AppResult<bool> {
            Ok(false)
        }
        async fn get(&self, code: &str) -> AppResult<ItemModel> {
            self.inner.get(code).await
        }
        async fn get_by_id(&self, id: i64) -> AppResult<ItemModel> {
            self.inner.get_by_id(id).await
        }
        async fn insert(&self, item: NewItem) -> AppResult<ItemModel> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.inner.insert(item).await
        }
        async fn save(&self, item: &ItemModel) -> AppResult<ItemModel> {
            self.inner.save(item).await
        }
        async fn set_status(&self, code: &str, status: ItemStatus) -> AppResult<ItemModel> {
            self.inner.set_status(code, status).await
        }
        async fn delete(&self, id: i64) -> AppResult<()> {
            self.inner.delete(id).await
        }
        async fn list(&self, filter: &ItemFilter) -> AppResult<Vec<ItemModel>> {
            self.inner.list(filter).await
        }
    }

    /// Serves `get` from a snapshot taken before later edits were stored.
    struct SnapshotStore {
        inner: MemoryStore,
        snapshot: ItemModel,
    }

    #[tonic::async_trait]
    impl ItemStore for SnapshotStore {
        async fn exists(&self, code: &str) -> AppResult<bool> {
            self.inner.exists(code).await
        }
        async fn get(&self, _code: &str) -> AppResult<ItemModel> {
            Ok(self.snapshot.clone())
        }
        async fn get_by_id(&self, id: i64) -> AppResult<ItemModel> {
            self.inner.get_by_id(id).await
        }
        async fn insert(&self, item: NewItem) -> AppResult<ItemModel> {
            self.inner.insert(item).await
        }
        async fn save(&self, item: &ItemModel) -> AppResult<ItemModel> {
            self.inner.save(item).await
        }
        async fn set_status(&self, code: &str, status: ItemStatus) -> AppResult<ItemModel> {
            self.inner.set_status(code, status).await
        }
        async fn delete(&self, id: i64) -> AppResult<()> {
            self.inner.delete(id).await
        }
        async fn list(&self, filter: &ItemFilter) -> AppResult<Vec<ItemModel>> {
            self.inner.list(filter).await
        }
    }

    #[tokio::test]
    async fn test_update_status_keeps_concurrent_edits() {
        let inner = MemoryStore::new();
        let bags = inner.create_category("Bags").await.unwrap();
        let mut f = fields("Backpack");
        f.category_id = Some(bags.id);
        let snapshot = inner
            .insert(NewItem {
                code: "SNAP0001".to_string(),
                fields: f,
            })
            .await
            .unwrap();

        // Edited and uncategorised after the snapshot was read
        let mut edited = snapshot.clone();
        edited.title = "Green backpack".to_string();
        inner.save(&edited).await.unwrap();
        inner.delete_category(bags.id).await.unwrap();

        let store = Arc::new(SnapshotStore { inner, snapshot });
        let catalog = Catalog::new(store.clone(), CodeGenerator::seeded(10));
        let updated = catalog.update_status("SNAP0001", "RESGATADO").await.unwrap();

        assert_eq!(updated.status, ItemStatus::Claimed);
        assert_eq!(updated.title, "Green backpack");
        assert_eq!(updated.category_id, None);
        assert_eq!(store.inner.get("SNAP0001").await.unwrap().title, "Green backpack");
    }

    #[tokio::test]
    async fn test_create_item_retries_late_collision() {
        // Occupy the first code the seeded generator will produce
        let first_code = CodeGenerator::seeded(42).next_code();
        let store = Arc::new(StaleExistsStore {
            inner: MemoryStore::new(),
            inserts: AtomicUsize::new(0),
        });
        store
            .inner
            .insert(NewItem {
                code: first_code.clone(),
                fields: fields("Existing"),
            })
            .await
            .unwrap();

        let catalog = Catalog::new(store.clone(), CodeGenerator::seeded(42));
        let item = catalog.create_item(fields("New")).await.unwrap();

        assert_ne!(item.code, first_code);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 2);
        assert_eq!(store.list(&ItemFilter::default()).await.unwrap().len(), 2);
    }
}
