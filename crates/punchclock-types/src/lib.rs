pub mod events;
pub mod ids;
pub mod models;
pub mod tables;
