pub mod text_loader;

pub use text_loader::{load_literature_dir, load_manuscript, SUPPORTED_EXTENSIONS};
