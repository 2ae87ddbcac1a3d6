pub mod auth;
pub mod error;
pub mod friends;
pub mod messages;
pub mod middleware;
