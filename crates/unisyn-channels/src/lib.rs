pub mod web;

pub use web::{build_router, WebServer};
