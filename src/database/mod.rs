pub mod connection;
mod profiles;
mod results;
mod sessions;
