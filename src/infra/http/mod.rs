mod admin;
mod public;

pub use public::{HttpState, build_router};
