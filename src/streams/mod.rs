//! Payment streams: synchronization, composition and analytics.

pub mod analytics;
pub mod composer;
pub mod sync;
pub mod types;

pub use analytics::{RecentActivity, StreamStats};
pub use composer::{
    CreatedStream, FundingReceipt, RecipientInput, StreamComposer, StreamDraft, StreamPlan, StreamPreview,
};
pub use sync::{CycleOutcome, StreamSnapshot, StreamSynchronizer};
pub use types::{derive_activity, distribution_epsilon, pause_adjusted_reward, Activity, StreamView};
