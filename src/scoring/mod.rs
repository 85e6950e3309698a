pub mod aesthetics;
pub mod heuristics;

pub use aesthetics::{
    scorer_from_config, AestheticError, AestheticScorer, DisabledScorer, OpenAiVisionScorer,
};
pub use heuristics::{evaluate_heuristics, ScoreTargets, PRICE_COST_BOUND};
