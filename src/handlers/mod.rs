pub mod admin_handlers;
pub mod health_handlers;
pub mod upload_handlers;
