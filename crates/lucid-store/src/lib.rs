pub mod events;
pub mod history;
pub mod sessions;
pub mod steps;

pub use events::EventTracker;
pub use sessions::{SessionController, SessionSource};
pub use steps::{Step, StepTracker};
