//! Policy storage engine
//!
//! - [`template`] compiles subject/action/resource templates and derives their IDs
//! - [`schema`] describes the seven-table layout
//! - [`store`] writes policies and answers candidate queries
//! - [`fold`] rebuilds policies from flattened join rows

pub mod cache;
pub mod condition;
pub mod database;
pub mod fold;
pub mod policy;
pub mod schema;
pub mod store;
pub mod template;
