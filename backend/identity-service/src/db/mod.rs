/// Database operations for identity service
pub mod users;
