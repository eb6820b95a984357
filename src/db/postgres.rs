use sqlx::PgPool;

use crate::db::store::{AccountStore, CategoryStore, ItemStore};
use crate::error::{sql_state, AppError, AppResult, PG_FOREIGN_KEY_VIOLATION, PG_UNIQUE_VIOLATION};
use crate::models::{
    CategoryModel, ItemFilter, ItemModel, ItemStatus, NewItem, NewUser, UserModel,
};

const ITEM_COLUMNS: &str = "i.id, i.code, i.title, i.category_id, c.name AS category_name, \
     i.description, i.photo, i.status, i.found_on, i.created_at, i.updated_at";

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, is_staff, \
     is_active, is_superuser, date_joined, last_login";

/// PostgreSQL-backed store for items, categories and accounts.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_item_write_error(err: sqlx::Error, item: &NewItem) -> AppError {
    match sql_state(&err).as_deref() {
        Some(PG_UNIQUE_VIOLATION) => AppError::UniquenessViolation(item.code.clone()),
        Some(PG_FOREIGN_KEY_VIOLATION) => category_missing(item.fields.category_id),
        _ => AppError::Database(err),
    }
}

fn category_missing(category_id: Option<i64>) -> AppError {
    match category_id {
        Some(id) => AppError::InvalidInput(format!("Category {} does not exist", id)),
        None => AppError::InvalidInput("Category does not exist".to_string()),
    }
}

/// Escapes LIKE metacharacters so user input matches literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn search_condition(param_idx: u32) -> String {
    format!(
        "(i.code ILIKE ${0} OR i.title ILIKE ${0} OR i.description ILIKE ${0})",
        param_idx
    )
}

#[tonic::async_trait]
impl ItemStore for PgStore {
    async fn exists(&self, code: &str) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM items WHERE code = $1)")
            .bind(code)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn get(&self, code: &str) -> AppResult<ItemModel> {
        let sql = format!(
            "SELECT {} FROM items i LEFT JOIN categories c ON c.id = i.category_id \
             WHERE i.code = $1",
            ITEM_COLUMNS
        );
        sqlx::query_as::<_, ItemModel>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Item with code \"{}\" not found", code)))
    }

    async fn get_by_id(&self, id: i64) -> AppResult<ItemModel> {
        let sql = format!(
            "SELECT {} FROM items i LEFT JOIN categories c ON c.id = i.category_id \
             WHERE i.id = $1",
            ITEM_COLUMNS
        );
        sqlx::query_as::<_, ItemModel>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Item not found".to_string()))
    }

    async fn insert(&self, item: NewItem) -> AppResult<ItemModel> {
        let sql = format!(
            "WITH i AS ( \
                INSERT INTO items (code, title, category_id, description, photo, found_on) \
                VALUES ($1, $2, $3, $4, $5, $6) \
                RETURNING * \
             ) \
             SELECT {} FROM i LEFT JOIN categories c ON c.id = i.category_id",
            ITEM_COLUMNS
        );
        sqlx::query_as::<_, ItemModel>(&sql)
            .bind(&item.code)
            .bind(&item.fields.title)
            .bind(item.fields.category_id)
            .bind(&item.fields.description)
            .bind(item.fields.photo.as_deref())
            .bind(item.fields.found_on)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_item_write_error(e, &item))
    }

    async fn save(&self, item: &ItemModel) -> AppResult<ItemModel> {
        let sql = format!(
            "WITH i AS ( \
                UPDATE items SET title = $1, category_id = $2, description = $3, photo = $4, \
                status = $5, found_on = $6, updated_at = NOW() \
                WHERE code = $7 \
                RETURNING * \
             ) \
             SELECT {} FROM i LEFT JOIN categories c ON c.id = i.category_id",
            ITEM_COLUMNS
        );
        sqlx::query_as::<_, ItemModel>(&sql)
            .bind(&item.title)
            .bind(item.category_id)
            .bind(&item.description)
            .bind(item.photo.as_deref())
            .bind(item.status.as_str())
            .bind(item.found_on)
            .bind(&item.code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| match sql_state(&e).as_deref() {
                Some(PG_FOREIGN_KEY_VIOLATION) => category_missing(item.category_id),
                _ => AppError::Database(e),
            })?
            .ok_or_else(|| AppError::NotFound(format!("Item with code \"{}\" not found", item.code)))
    }

    async fn set_status(&self, code: &str, status: ItemStatus) -> AppResult<ItemModel> {
        let sql = format!(
            "WITH i AS ( \
                UPDATE items SET status = $1, updated_at = NOW() \
                WHERE code = $2 \
                RETURNING * \
             ) \
             SELECT {} FROM i LEFT JOIN categories c ON c.id = i.category_id",
            ITEM_COLUMNS
        );
        sqlx::query_as::<_, ItemModel>(&sql)
            .bind(status.as_str())
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Item with code \"{}\" not found", code)))
    }

    async fn delete(&self, id: i64) -> AppResult<()> {
        let rows_affected = sqlx::query("DELETE FROM items WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows_affected == 0 {
            return Err(AppError::NotFound("Item not found".to_string()));
        }
        Ok(())
    }

    async fn list(&self, filter: &ItemFilter) -> AppResult<Vec<ItemModel>> {
        // Build dynamic WHERE clause
        let mut conditions = Vec::new();
        let mut param_idx = 1u32;

        if filter.code.is_some() {
            conditions.push(format!("i.code = ${}", param_idx));
            param_idx += 1;
        }

        // One OR-group per search term, all terms required
        let search_patterns: Vec<String> = filter
            .search_terms()
            .into_iter()
            .map(|term| format!("%{}%", escape_like(term)))
            .collect();
        for _ in &search_patterns {
            conditions.push(search_condition(param_idx));
            param_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM items i LEFT JOIN categories c ON c.id = i.category_id \
             {} ORDER BY i.created_at DESC, i.id DESC",
            ITEM_COLUMNS, where_clause
        );

        let mut query = sqlx::query_as::<_, ItemModel>(&sql);
        if let Some(ref code) = filter.code {
            query = query.bind(code);
        }
        for pattern in &search_patterns {
            query = query.bind(pattern);
        }

        Ok(query.fetch_all(&self.pool).await?)
    }
}

#[tonic::async_trait]
impl CategoryStore for PgStore {
    async fn list_categories(&self) -> AppResult<Vec<CategoryModel>> {
        let categories = sqlx::query_as::<_, CategoryModel>(
            "SELECT id, name FROM categories ORDER BY name ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }

    async fn get_category(&self, id: i64) -> AppResult<CategoryModel> {
        sqlx::query_as::<_, CategoryModel>("SELECT id, name FROM categories WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Category not found".to_string()))
    }

    async fn create_category(&self, name: &str) -> AppResult<CategoryModel> {
        let category = sqlx::query_as::<_, CategoryModel>(
            "INSERT INTO categories (name) VALUES ($1) RETURNING id, name",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(category)
    }

    async fn delete_category(&self, id: i64) -> AppResult<()> {
        // items.category_id is ON DELETE SET NULL
        let rows_affected = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows_affected == 0 {
            return Err(AppError::NotFound("Category not found".to_string()));
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl AccountStore for PgStore {
    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<UserModel>> {
        let sql = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, UserModel>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_user(&self, id: i64) -> AppResult<UserModel> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        sqlx::query_as::<_, UserModel>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    async fn create_user(&self, user: NewUser) -> AppResult<UserModel> {
        let sql = format!(
            "INSERT INTO users (email, password_hash, first_name, last_name, is_staff, is_superuser) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            USER_COLUMNS
        );
        sqlx::query_as::<_, UserModel>(&sql)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.is_staff)
            .bind(user.is_superuser)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match sql_state(&e).as_deref() {
                Some(PG_UNIQUE_VIOLATION) => AppError::InvalidInput(format!(
                    "A user with email {} already exists",
                    user.email
                )),
                _ => AppError::Database(e),
            })
    }

    async fn record_login(&self, id: i64) -> AppResult<()> {
        sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
