pub mod broadcast;
pub mod commands;
pub mod config;
pub mod database;
pub mod errors;
pub mod image_processor;
pub mod security;
