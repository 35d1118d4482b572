pub mod device_catalog;
pub mod target_resolver;
