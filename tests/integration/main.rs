//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises the client stack
//! against the simulated device in `mock_device`, which listens on a
//! loopback socket.  No real device is required.

mod debug_session_tests;
mod end_to_end_tests;
mod mock_device;
mod ownership_tests;
