pub mod gate;
pub mod scorer;

pub use gate::{Assessment, Mutation, NotificationGate, PrioritySummary, RankedSignal, Triage};
pub use scorer::{PriorityScore, PriorityScorer, Urgency};
