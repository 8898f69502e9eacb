//! Pipeline stages for prescription-to-JSON extraction.
//!
//! Each submodule implements exactly one transformation step and can be
//! tested on its own. The orchestrator in [`crate::extract`] runs them in a
//! fixed sequence; there is no branching back.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ content ──▶ mode ──▶ request ──▶ backend ──▶ coerce ──▶ normalize
//! (path/URL) (text+png)  (pick)   (prompt)    (LLM)      (JSON)     (dates, numbers)
//! ```
//!
//! 1. [`input`]     resolve a path, URL or byte buffer to a local PDF
//! 2. [`content`]   read the text layer, judge sufficiency, render pages
//!    through [`render`] (pdfium, `spawn_blocking`) when the mode needs them
//! 3. [`mode`]      text-only, vision or hybrid
//! 4. [`request`]   provider-neutral [`request::ModelRequest`]
//! 5. [`backend`]   the only stage with network I/O, under a deadline
//! 6. [`coerce`]    locate the JSON object and force it into schema shape
//! 7. [`normalize`] per-field date and number cleanup

pub mod backend;
pub mod coerce;
pub mod content;
pub mod encode;
pub mod input;
pub mod mode;
pub mod normalize;
pub mod render;
pub mod request;
