pub mod backend;
pub mod capture_delegate;
pub mod session_provider;
pub mod source_recorder;
