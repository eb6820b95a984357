// Persistence seams used by the catalog and auth services

use crate::error::AppResult;
use crate::models::{
    CategoryModel, ItemFilter, ItemModel, ItemStatus, NewItem, NewUser, UserModel,
};

/// Item record store.
///
/// `insert` must reject a duplicate code with `AppError::UniquenessViolation`
/// regardless of any prior `exists` check; the store's constraint is the
/// authoritative guard.
#[tonic::async_trait]
pub trait ItemStore: Send + Sync {
    /// Whether any item holds this exact code
    async fn exists(&self, code: &str) -> AppResult<bool>;

    /// Exact, case-sensitive lookup by code
    async fn get(&self, code: &str) -> AppResult<ItemModel>;

    async fn get_by_id(&self, id: i64) -> AppResult<ItemModel>;

    /// First persistence of an item. Status starts as `DISPONIVEL`.
    async fn insert(&self, item: NewItem) -> AppResult<ItemModel>;

    /// Atomically writes the editable fields and status of the item keyed
    /// by `item.code`. The code itself is never rewritten.
    async fn save(&self, item: &ItemModel) -> AppResult<ItemModel>;

    /// Writes only the status (and `updated_at`) of the item with exactly
    /// this code, leaving every other column as currently stored.
    async fn set_status(&self, code: &str, status: ItemStatus) -> AppResult<ItemModel>;

    async fn delete(&self, id: i64) -> AppResult<()>;

    /// Newest first
    async fn list(&self, filter: &ItemFilter) -> AppResult<Vec<ItemModel>>;
}

#[tonic::async_trait]
pub trait CategoryStore: Send + Sync {
    /// Ordered by name
    async fn list_categories(&self) -> AppResult<Vec<CategoryModel>>;

    async fn get_category(&self, id: i64) -> AppResult<CategoryModel>;

    async fn create_category(&self, name: &str) -> AppResult<CategoryModel>;

    /// Removes the category and detaches every item that referenced it.
    async fn delete_category(&self, id: i64) -> AppResult<()>;
}

#[tonic::async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<UserModel>>;

    async fn get_user(&self, id: i64) -> AppResult<UserModel>;

    async fn create_user(&self, user: NewUser) -> AppResult<UserModel>;

    async fn record_login(&self, id: i64) -> AppResult<()>;
}
