//! Scheduled dispatcher that drains CSV batches of pins from a GitHub
//! repository into the Pinterest API and archives each batch once sent.

pub mod archive;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod model;
pub mod orchestrator;
pub mod publisher;
pub mod rows;
pub mod server;
pub mod source;
pub mod store;
