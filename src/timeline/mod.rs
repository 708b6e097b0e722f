// Timeline subsystem for EchoNote Core
// Aggregated event window plus the auto-task scheduler that observes it

mod manager;
mod scheduler;

pub use manager::{
    EventArtifacts, FutureEventEntry, PastEventEntry, SearchHit, TimelineFilters, TimelineManager,
    TimelinePage,
};
pub use scheduler::{
    AutoTaskScheduler, ChannelPromptBridge, Clock, PromptRequest, StopDecision, StopPromptHandler,
    SystemClock,
};
