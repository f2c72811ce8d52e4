// Private module - only the client type is exposed
mod client;
mod wire;

pub use client::TypesenseClient;
