//! Pipeline stages for HTML-to-PDF conversion.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested without the others.
//!
//! ## Data Flow
//!
//! ```text
//! prepare ──▶ screenshot ──▶ compose ──▶ encode
//! (CSS)       (remote PNG)   (canvas)    (lopdf)
//! ```
//!
//! 1. [`prepare`] injects the single-page stylesheet into the HTML
//! 2. [`screenshot`] posts the HTML to the remote browser and returns PNG
//!    bytes; the only stage with network I/O
//! 3. [`compose`] scales the screenshot onto a page-sized canvas
//! 4. [`encode`] wraps the canvas in a one-page PDF
//!
//! Stages 3 and 4 are CPU-bound and run inside `spawn_blocking`.

pub mod compose;
pub mod encode;
pub mod prepare;
pub mod screenshot;
