pub mod access;
pub mod browser;
