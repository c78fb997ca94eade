pub mod compare;
pub mod load;
pub mod query;
pub mod show_entity;
pub mod status;
