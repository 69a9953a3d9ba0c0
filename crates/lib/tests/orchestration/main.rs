//! End-to-end tests: definition files on disk through the server to events.

mod common;
mod lifecycle_tests;
mod resolution_tests;
mod scheduling_tests;
