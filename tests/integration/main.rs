//! Integration tests for the Dailog session client.
//! These run the real reqwest client against mockito servers.

pub mod test_harness;

mod authorization_test;
mod health_test;
mod session_test;
