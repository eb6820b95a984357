pub mod category;
pub mod item;
pub mod user;

pub use category::*;
pub use item::*;
pub use user::*;
