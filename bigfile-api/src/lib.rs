//! # BigFile API Client
//!
//! A Rust client for the chunked big-file upload service.
//!
//! ## Features
//!
//! - Whole-file existence check (instant upload / resume seeding)
//! - Multipart chunk upload with a streaming body
//! - Server-side merge and upload progress queries
//! - Envelope-tolerant response decoding
//!
//! ## Example
//!
//! ```no_run
//! use bigfile_api::{Client, ClientConfig};
//! use bigfile_api::api::BigFileApi;
//! use bigfile_api::models::CheckFileRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(ClientConfig::new("http://localhost:3007/"))?;
//!
//!     let result = client
//!         .check_file(&CheckFileRequest {
//!             file_hash: "9e107d9d372bb6826bd81d3542a419d6".to_string(),
//!             file_name: "movie.mp4".to_string(),
//!             file_size: 10 * 1024 * 1024,
//!         })
//!         .await?;
//!     println!("exists: {}", result.exists);
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod error;
pub mod models;

pub use client::{Client, ClientConfig};
pub use error::{ApiError, ApiResult};
