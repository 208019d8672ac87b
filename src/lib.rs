pub mod catalog;
pub mod config;
pub mod embed;
pub mod recommend;
pub mod store;
