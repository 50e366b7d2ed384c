pub mod choice;
pub mod client;
pub mod column;
pub mod entity;
pub mod project;
pub mod record;
pub mod task;

pub use client::Client;
pub use column::{parse_timestamp, ColumnKind, ColumnSpec, ColumnValue, FieldValues};
pub use entity::EntityType;
pub use project::Project;
pub use record::Record;
pub use task::Task;
