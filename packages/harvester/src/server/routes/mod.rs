// HTTP routes
pub mod health;
pub mod seed;
pub mod status;

pub use health::*;
pub use seed::*;
pub use status::*;

use serde::Serialize;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
