pub mod controller;
pub mod observer;
pub mod state;

pub use controller::{TrackerSnapshot, TrackingController};
pub use observer::{
    ActivityObserver, EventSink, ForegroundEvent, ManualObserver, StdinObserver,
    UnavailableReason,
};
pub use state::{TrackerState, TrackerStatus, Transition};
