pub mod config;
pub mod health;
pub mod rbac;
pub mod roles;
pub mod users;
