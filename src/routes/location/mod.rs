mod handler;
pub mod model;

pub use handler::trip_stream;
