//! Columnar chunk codec for Batchline.
//!
//! A chunk is a self-describing block of native-endian 32-bit words written
//! into memory owned by the host:
//!
//! - **Types**: Type tags and the type-width resolver
//! - **Encoder**: Record batch to chunk, with configurable type mapping
//! - **Reader**: Chunk parsing and cell decoding for consumers
//! - **Allocator**: The host memory seam and an in-process heap host
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use arrow::array::{ArrayRef, Int32Array};
//! use arrow::record_batch::RecordBatch;
//! use batchline_chunk::{CellValue, ChunkEncoder, EncoderOptions, HeapAllocator, RawBatch};
//!
//! let batch = RecordBatch::try_from_iter([(
//!     "n",
//!     Arc::new(Int32Array::from(vec![1, 2])) as ArrayRef,
//! )])
//! .unwrap();
//!
//! let host = Arc::new(HeapAllocator::new());
//! let encoder = ChunkEncoder::new(host.clone(), EncoderOptions::default());
//! let address = encoder.encode(&RawBatch::new(batch, false)).unwrap();
//!
//! let chunk = host.take(address).unwrap();
//! let reader = chunk.reader().unwrap();
//! assert_eq!(reader.names(), ["n"]);
//! assert_eq!(reader.column(0).unwrap().value(1).unwrap(), Some(CellValue::Int(2)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod allocator;
pub mod encoder;
pub mod error;
pub mod layout;
pub mod reader;
pub mod types;

pub use allocator::{AllocatorStats, HeapAllocator, HostAllocator, OwnedChunk};
pub use encoder::{ChunkEncoder, EncoderOptions, RawBatch, UnsupportedColumnPolicy};
pub use error::{ChunkError, ChunkResult};
pub use reader::{CellValue, ChunkReader, ColumnView};
pub use types::{resolve_width, TypeTag};
