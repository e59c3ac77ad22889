// Core domain types shared across modules

pub mod errors;
pub mod models;
