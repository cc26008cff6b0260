// Presentation layer - HTTP snapshot reads and the operator limits surface
pub mod app_state;
pub mod handlers;
