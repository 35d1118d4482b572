pub mod cancel;
pub mod worker;
