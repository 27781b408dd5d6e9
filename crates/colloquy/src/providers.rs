pub mod api_client;
pub mod base;
pub mod errors;
pub mod factory;
pub mod formats;
pub mod openai_compat;
pub mod utils;

#[cfg(test)]
pub mod mock;
