pub mod auth;
pub mod cache;
pub mod channel;
pub mod deletion;
pub mod error;
pub mod feed;
pub mod identity;
pub mod integrity;
pub mod message;
pub mod ports;
pub mod reaction;
pub mod read_state;
pub mod retention;
pub mod thread;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
