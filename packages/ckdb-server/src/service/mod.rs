//! Command dispatch: one handler per verb.

mod handlers;

pub use handlers::{dispatch, HandlerContext};
