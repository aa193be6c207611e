/// Data models for identity
pub mod user;

pub use user::{NewUser, User};
