pub mod auth_service;
pub mod categories_service;
pub mod health_service;
pub mod items_service;

pub use auth_service::AuthServiceImpl;
pub use categories_service::CategoriesServiceImpl;
pub use health_service::HealthServiceImpl;
pub use items_service::ItemsServiceImpl;
