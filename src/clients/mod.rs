pub mod circuit_breaker;
pub mod database;
pub mod email;
pub mod health;
pub mod memory;
pub mod queue;
pub mod rbmq;
pub mod redis;
