pub mod analytics;
pub mod backup_exchange;
pub mod core;
pub mod courses;
pub mod groups;
pub mod point_types;
pub mod points;
pub mod students;
pub mod summaries;
