//! # Twin Client Test Suite
//!
//! Cross-crate tests for the correlation layer and the twin service
//! simulator.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/               # criterion benchmarks (codec, pending table, router)
//! └── src/integration/
//!     ├── request_flows.rs        # correlation of responses to requests
//!     └── change_notifications.rs # fan-out of change events to listeners
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p twin-tests
//!
//! # By area
//! cargo test -p twin-tests integration::request_flows
//! cargo test -p twin-tests integration::change_notifications
//!
//! # Benchmarks
//! cargo bench -p twin-tests
//! ```

#![allow(dead_code)]

pub mod integration;
