pub mod coerce;
pub mod config;
pub mod geo;
pub mod http_client;
pub mod runtime;
pub mod server;
pub mod services;
pub mod session;
pub mod tools;

#[cfg(test)]
mod test_support;
