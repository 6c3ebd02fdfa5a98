//! Request dispatch: backend selection, forwarding and bounded retries.

mod attempt;
mod dispatcher;
mod request;

pub use attempt::{Attempt, DispatchPolicy};
pub use dispatcher::{DispatchError, Dispatcher, SERVICE_UNAVAILABLE_MESSAGE};
pub use request::{BufferedRequest, ReadBodyError};
