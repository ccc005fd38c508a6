pub mod middleware;
pub mod oauth;
pub mod token;
