//! # Lockbox Testkit
//!
//! Testing utilities for Lockbox.
//!
//! ## Overview
//!
//! - **Fixtures**: a [`TestNetwork`] wires a server to registered clients
//!   over the in-process transport, backed by either store
//! - **Generators**: Proptest strategies for names, keys and plaintexts
//!
//! ## Test Fixtures
//!
//! ```rust
//! use lockbox_testkit::{file, TestNetwork};
//!
//! # tokio_test_block(async {
//! let net = TestNetwork::memory();
//! let alice = net.client("alice").await;
//! let bob = net.client("bob").await;
//!
//! alice.upload(&file("notes.txt"), b"hello").await.unwrap();
//! alice.share(&file("notes.txt"), bob.user()).await.unwrap();
//! assert_eq!(bob.download(alice.user(), &file("notes.txt")).await.unwrap(), b"hello");
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use lockbox_testkit::generators::{content_key, plaintext};
//!
//! proptest! {
//!     #[test]
//!     fn seal_open(key in content_key(), data in plaintext(4096)) {
//!         let sealed = lockbox_core::hybrid::seal(&key, &data).unwrap();
//!         prop_assert_eq!(lockbox_core::hybrid::open(&key, &sealed).unwrap(), data);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{file, seeded_keypairs, user, TestClient, TestNetwork};
