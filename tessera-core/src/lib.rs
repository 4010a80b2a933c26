pub mod auth;
pub mod cipher;
pub mod config;
pub mod decode;
pub mod directory;
pub mod encode;
pub mod error;
pub mod manifest;
pub mod payload;
pub mod retention;
pub mod rs_codec;
pub mod secret;
pub mod store;
pub mod sync;
pub mod task;
pub mod timelock;

pub use error::{Error, Result};
