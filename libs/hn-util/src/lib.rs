//! Small helpers shared between the hypernote crates.

pub mod warn;
