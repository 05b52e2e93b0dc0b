pub mod support;

pub mod injection_tests;
pub mod registry_tests;
