pub mod backends;
mod template;

pub use template::ObjectStore;
