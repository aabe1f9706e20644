pub mod admin;
pub mod commands;
pub mod files;
pub mod sessions;
