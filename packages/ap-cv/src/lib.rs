//! Computer vision for automation: locating templates on a screen and reading text from it.

pub mod core;
pub mod matcher;
pub mod ocr;

pub use ocr::Region;
