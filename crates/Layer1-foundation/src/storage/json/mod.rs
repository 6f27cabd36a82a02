mod store;

pub use store::{ConfigScope, JsonStore};
