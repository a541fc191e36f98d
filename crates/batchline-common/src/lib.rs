//! # batchline-common
//!
//! Common types, constants, and memory primitives for Batchline.
//!
//! This crate provides the foundational pieces shared by the chunk codec and
//! the query bridge:
//!
//! - **Types**: `QueryId` correlation tokens and `ChunkAddress` handles
//! - **Errors**: Stable numeric `ErrorCode`s for responses and logs
//! - **Constants**: The chunk layout constants and null sentinels
//! - **Memory**: Zero-filled, aligned heap buffers
//!
//! ## Example
//!
//! ```rust
//! use batchline_common::types::{ChunkAddress, QueryId};
//!
//! let id = QueryId::new("Q1");
//! assert_eq!(id.as_str(), "Q1");
//! assert!(ChunkAddress::TERMINAL.is_terminal());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod constants;
pub mod error;
pub mod memory;
pub mod types;

pub use constants::*;
pub use error::ErrorCode;
pub use types::{ChunkAddress, QueryId};
