use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CategoryModel {
    pub id: i64,
    pub name: String,
}
