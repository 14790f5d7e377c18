use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod attachments;
pub mod cache;
pub mod channel;
pub mod deletion;
pub mod directory;
pub mod lock;
pub mod message;
pub mod notify;
pub mod reaction;
pub mod read_state;
pub mod thread;
