pub mod logging;
pub mod text_utils;

pub use logging::truncate_text;
