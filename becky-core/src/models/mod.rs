pub mod backup_item;
pub mod backup_job;
pub mod differential;
pub mod log;
pub mod metadata;
pub mod selection;
pub mod status;
