pub mod data_types;
pub mod events;
