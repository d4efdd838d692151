mod handler;
pub mod model;

pub use handler::{create_or_get_user, get_user_trips};
