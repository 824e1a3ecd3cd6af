//! Parallel processing
#![deny(missing_docs)]

mod par_proc;

pub use par_proc::{Proc, process_in_order, process_sequential};
