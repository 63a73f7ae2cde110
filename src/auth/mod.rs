pub mod clock;
pub mod csrf;
pub mod entropy;
pub mod middleware;
pub mod origin;
pub mod session;
pub mod store;
