pub mod circuit_breaker;
pub mod event;
pub mod health;
pub mod job;
pub mod notification;
pub mod preference;
pub mod response;
pub mod retry;
pub mod status;
pub mod template;
pub mod user;
pub mod validation;
