//! 结果综合：去重、质量评分、引用抽取、答案类型分类与 checkpoint

pub mod checkpoint;
pub mod citations;
pub mod dedup;
pub mod quality;
pub mod synthesizer;

pub use checkpoint::checkpoint_id;
pub use citations::{build_citations, Citation};
pub use dedup::{deduplicate, stable_id, DedupOutcome, DedupedItem};
pub use quality::{score, QualityInputs, QualityMetrics};
pub use synthesizer::{AnswerType, SynthesisMetrics, SynthesisOutput, Synthesizer};
