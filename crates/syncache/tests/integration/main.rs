// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod fetchers;
pub mod focus;
pub mod http;
pub mod users;
pub mod utils;

pub use utils::*;
