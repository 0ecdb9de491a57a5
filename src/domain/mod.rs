pub mod error;
pub mod field_map;
pub mod models;
pub mod ports;
