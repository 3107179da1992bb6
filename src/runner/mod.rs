pub mod capture;
pub mod dispatcher;
pub mod session;
pub mod state;

pub use dispatcher::{Action, ActionDispatcher, ActionOutcome, ScrollDirection, Target};
pub use session::Session;
pub use state::*;
