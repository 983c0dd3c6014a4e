mod aggregate_tests;
mod identity_tests;
mod pipeline_tests;
