pub mod api_client;
pub mod client;
pub mod roulette;
pub mod session;
pub mod types;
pub mod ui;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
