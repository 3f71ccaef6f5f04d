pub mod models;
pub mod outcome;
pub mod schema;
pub mod state;
#[cfg(test)]
pub mod test_utils;
pub mod utils;
