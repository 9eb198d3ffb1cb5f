pub mod literature;
pub mod loaders;
pub mod manuscript;
pub mod report;

pub use literature::{ExtractionMethod, LiteratureMetadata, Passage, ScoredLiterature};
pub use loaders::{load_literature_dir, load_manuscript};
pub use manuscript::{LiteratureDocument, Manuscript, RunInput};
pub use report::{AnalysisReport, PolishDraft, ReviewVerdict, Suggestion};
