//! Common test utilities for integration tests
//!
//! - File-backed mock drives behind a `DeviceBackend`
//! - Engine assembly over the simulated backend
//! - Helpers for waiting on operations and checking device contents

pub mod mock_drive;
pub mod test_helpers;
