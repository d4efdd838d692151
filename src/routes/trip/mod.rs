mod handler;
pub mod model;

pub use handler::{create_trip, list_trips, search_trips, trip_detail, update_trip_status};
