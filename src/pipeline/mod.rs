//! Pipeline stages for both conversion directions.
//!
//! Each submodule implements one step; [`crate::convert::ConversionPipeline`]
//! wires them together per request.
//!
//! ## Data Flow
//!
//! ```text
//! images→document:  input ──▶ pool(decode+encode) ──▶ assemble ──▶ document
//! document→images:  input ──▶ render(count) ──▶ pool(render+encode) ──▶ assemble ──▶ archive
//!                   └──────────────── scratch (one area per request) ──────────────┘
//! ```
//!
//! 1. [`scratch`]: per-request working directory, released on every exit path
//! 2. [`input`]: request types, image kind detection, document staging
//! 3. [`render`]: the `PageRenderer` capability and its pdfium/poppler backends
//! 4. [`encode`]: PNG/JPEG output encoding and XObject preparation
//! 5. [`pool`]: bounded concurrent execution with cancellation
//! 6. [`assemble`]: completion order → job order, fail-fast on the lowest index
//! 7. [`document`]: one full-bleed page per image
//! 8. [`archive`]: zip packaging for multi-page output

pub mod archive;
pub mod assemble;
pub mod document;
pub mod encode;
pub mod input;
pub mod pool;
pub mod render;
pub mod scratch;
