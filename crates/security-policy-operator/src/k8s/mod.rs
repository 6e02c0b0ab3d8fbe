pub mod guard_ext;
pub mod status_ext;
mod store;
