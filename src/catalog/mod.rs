pub mod code;
pub mod lifecycle;

pub use code::{generate_unique_code, CodeGenerator, CODE_ALPHABET, CODE_LENGTH};
pub use lifecycle::Catalog;
