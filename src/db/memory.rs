use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use crate::db::store::{AccountStore, CategoryStore, ItemStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    CategoryModel, ItemFilter, ItemModel, ItemStatus, NewItem, NewUser, UserModel,
};

#[derive(Default)]
struct State {
    items: BTreeMap<i64, ItemModel>,
    categories: BTreeMap<i64, CategoryModel>,
    users: BTreeMap<i64, UserModel>,
    next_item_id: i64,
    next_category_id: i64,
    next_user_id: i64,
}

impl State {
    fn with_category_name(&self, mut item: ItemModel) -> ItemModel {
        item.category_name = item
            .category_id
            .and_then(|id| self.categories.get(&id))
            .map(|c| c.name.clone());
        item
    }

    fn check_category(&self, category_id: Option<i64>) -> AppResult<()> {
        match category_id {
            Some(id) if !self.categories.contains_key(&id) => Err(AppError::InvalidInput(
                format!("Category {} does not exist", id),
            )),
            _ => Ok(()),
        }
    }
}

/// In-process store with the same constraints as the PostgreSQL schema:
/// unique item codes, unique user emails, category detach on delete.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))
    }
}

#[tonic::async_trait]
impl ItemStore for MemoryStore {
    async fn exists(&self, code: &str) -> AppResult<bool> {
        Ok(self.lock()?.items.values().any(|i| i.code == code))
    }

    async fn get(&self, code: &str) -> AppResult<ItemModel> {
        let state = self.lock()?;
        state
            .items
            .values()
            .find(|i| i.code == code)
            .cloned()
            .map(|i| state.with_category_name(i))
            .ok_or_else(|| AppError::NotFound(format!("Item with code \"{}\" not found", code)))
    }

    async fn get_by_id(&self, id: i64) -> AppResult<ItemModel> {
        let state = self.lock()?;
        state
            .items
            .get(&id)
            .cloned()
            .map(|i| state.with_category_name(i))
            .ok_or_else(|| AppError::NotFound("Item not found".to_string()))
    }

    async fn insert(&self, item: NewItem) -> AppResult<ItemModel> {
        let mut state = self.lock()?;
        if state.items.values().any(|i| i.code == item.code) {
            return Err(AppError::UniquenessViolation(item.code));
        }
        state.check_category(item.fields.category_id)?;

        state.next_item_id += 1;
        let now = Utc::now();
        let model = ItemModel {
            id: state.next_item_id,
            code: item.code,
            title: item.fields.title,
            category_id: item.fields.category_id,
            category_name: None,
            description: item.fields.description,
            photo: item.fields.photo,
            status: ItemStatus::Available,
            found_on: item.fields.found_on,
            created_at: now,
            updated_at: now,
        };
        state.items.insert(model.id, model.clone());
        Ok(state.with_category_name(model))
    }

    async fn save(&self, item: &ItemModel) -> AppResult<ItemModel> {
        let mut state = self.lock()?;
        state.check_category(item.category_id)?;

        let stored = state
            .items
            .values_mut()
            .find(|i| i.code == item.code)
            .ok_or_else(|| {
                AppError::NotFound(format!("Item with code \"{}\" not found", item.code))
            })?;
        stored.title = item.title.clone();
        stored.category_id = item.category_id;
        stored.description = item.description.clone();
        stored.photo = item.photo.clone();
        stored.status = item.status;
        stored.found_on = item.found_on;
        stored.updated_at = Utc::now();

        let saved = stored.clone();
        Ok(state.with_category_name(saved))
    }

    async fn set_status(&self, code: &str, status: ItemStatus) -> AppResult<ItemModel> {
        let mut state = self.lock()?;
        let stored = state
            .items
            .values_mut()
            .find(|i| i.code == code)
            .ok_or_else(|| AppError::NotFound(format!("Item with code \"{}\" not found", code)))?;
        stored.status = status;
        stored.updated_at = Utc::now();

        let saved = stored.clone();
        Ok(state.with_category_name(saved))
    }

    async fn delete(&self, id: i64) -> AppResult<()> {
        self.lock()?
            .items
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound("Item not found".to_string()))
    }

    async fn list(&self, filter: &ItemFilter) -> AppResult<Vec<ItemModel>> {
        let state = self.lock()?;
        let mut items: Vec<ItemModel> = state
            .items
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .map(|i| state.with_category_name(i))
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(items)
    }
}

#[tonic::async_trait]
impl CategoryStore for MemoryStore {
    async fn list_categories(&self) -> AppResult<Vec<CategoryModel>> {
        let mut categories: Vec<CategoryModel> =
            self.lock()?.categories.values().cloned().collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(categories)
    }

    async fn get_category(&self, id: i64) -> AppResult<CategoryModel> {
        self.lock()?
            .categories
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("Category not found".to_string()))
    }

    async fn create_category(&self, name: &str) -> AppResult<CategoryModel> {
        let mut state = self.lock()?;
        state.next_category_id += 1;
        let category = CategoryModel {
            id: state.next_category_id,
            name: name.to_string(),
        };
        state.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn delete_category(&self, id: i64) -> AppResult<()> {
        let mut state = self.lock()?;
        if state.categories.remove(&id).is_none() {
            return Err(AppError::NotFound("Category not found".to_string()));
        }
        for item in state.items.values_mut() {
            if item.category_id == Some(id) {
                item.category_id = None;
            }
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl AccountStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<UserModel>> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn get_user(&self, id: i64) -> AppResult<UserModel> {
        self.lock()?
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    async fn create_user(&self, user: NewUser) -> AppResult<UserModel> {
        let mut state = self.lock()?;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(AppError::InvalidInput(format!(
                "A user with email {} already exists",
                user.email
            )));
        }
        state.next_user_id += 1;
        let model = UserModel {
            id: state.next_user_id,
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            is_staff: user.is_staff,
            is_active: true,
            is_superuser: user.is_superuser,
            date_joined: Utc::now(),
            last_login: None,
        };
        state.users.insert(model.id, model.clone());
        Ok(model)
    }

    async fn record_login(&self, id: i64) -> AppResult<()> {
        let mut state = self.lock()?;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        user.last_login = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemFields;
    use chrono::NaiveDate;

    fn fields(title: &str, category_id: Option<i64>) -> ItemFields {
        ItemFields {
            title: title.to_string(),
            category_id,
            description: format!("{} found near the entrance", title),
            photo: None,
            found_on: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_code() {
        let store = MemoryStore::new();
        store
            .insert(NewItem {
                code: "AAAA1111".to_string(),
                fields: fields("Wallet", None),
            })
            .await
            .unwrap();

        let err = store
            .insert(NewItem {
                code: "AAAA1111".to_string(),
                fields: fields("Phone", None),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UniquenessViolation(code) if code == "AAAA1111"));
        assert_eq!(store.list(&ItemFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_unknown_category() {
        let store = MemoryStore::new();
        let err = store
            .insert(NewItem {
                code: "BBBB2222".to_string(),
                fields: fields("Scarf", Some(42)),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_delete_category_detaches_items() {
        let store = MemoryStore::new();
        let bags = store.create_category("Bags").await.unwrap();
        let item = store
            .insert(NewItem {
                code: "CCCC3333".to_string(),
                fields: fields("Backpack", Some(bags.id)),
            })
            .await
            .unwrap();
        assert_eq!(item.category_name.as_deref(), Some("Bags"));

        store.delete_category(bags.id).await.unwrap();

        let item = store.get("CCCC3333").await.unwrap();
        assert_eq!(item.category_id, None);
        assert_eq!(item.category_name, None);
        assert_eq!(item.title, "Backpack");
        assert!(matches!(
            store.get_category(bags.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_status_touches_only_status() {
        let store = MemoryStore::new();
        let item = store
            .insert(NewItem {
                code: "EEEE5555".to_string(),
                fields: fields("Gloves", None),
            })
            .await
            .unwrap();

        let claimed = store.set_status("EEEE5555", ItemStatus::Claimed).await.unwrap();
        assert_eq!(claimed.status, ItemStatus::Claimed);
        assert_eq!(claimed.title, item.title);
        assert_eq!(claimed.description, item.description);
        assert!(claimed.updated_at >= item.updated_at);

        assert!(matches!(
            store.set_status("eeee5555", ItemStatus::Available).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_categories_ordered_by_name() {
        let store = MemoryStore::new();
        store.create_category("Keys").await.unwrap();
        store.create_category("Bags").await.unwrap();
        store.create_category("Electronics").await.unwrap();

        let names: Vec<String> = store
            .list_categories()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Bags", "Electronics", "Keys"]);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = MemoryStore::new();
        for (i, title) in ["First", "Second", "Third"].iter().enumerate() {
            store
                .insert(NewItem {
                    code: format!("DDDD000{}", i),
                    fields: fields(title, None),
                })
                .await
                .unwrap();
        }
        let titles: Vec<String> = store
            .list(&ItemFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.title)
            .collect();
        assert_eq!(titles, vec!["Third", "Second", "First"]);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = MemoryStore::new();
        let user = NewUser {
            email: "staff@example.com".to_string(),
            password_hash: "hash".to_string(),
            first_name: "Ana".to_string(),
            last_name: String::new(),
            is_staff: true,
            is_superuser: false,
        };
        store.create_user(user.clone()).await.unwrap();
        assert!(matches!(
            store.create_user(user).await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
