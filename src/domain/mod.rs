pub mod factory;
pub mod policy;
pub mod preferences;
pub mod strategy;
pub mod templates;
