//! Periodic reconciliation of CDN hostnames against certificates.

pub mod grouper;
pub mod pipeline;
pub mod reconciler;


pub use grouper::{GroupingError, build_units};
pub use pipeline::Pipeline;
pub use reconciler::{PassReport, run_forever, run_once};
