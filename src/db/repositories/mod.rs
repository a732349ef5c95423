pub mod app_sessions;
pub mod content_index;
pub mod insights;
