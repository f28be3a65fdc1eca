pub mod api;
pub mod collectors;
pub mod config;
pub mod download;
pub mod history;
pub mod job;
pub mod labels;
pub mod lifecycle;
pub mod log_buffer;
pub mod metadata;
pub mod progress;
pub mod result_table;
pub mod saved_queries;
pub mod validation;
pub mod workspace;
