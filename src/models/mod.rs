//! Data models for the upload moderation service.
//!
//! These entities mirror the `users` and `uploads` tables. They map to rows
//! via `sqlx::FromRow` and serialize naturally as JSON via `serde`.

pub mod upload;
pub mod user;
