mod common;

mod api_tests;
mod factory_tests;
mod redis_tests;
mod retry_tests;
mod worker_tests;
