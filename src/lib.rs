pub mod cli;
pub mod config;
pub mod logging;
pub mod monitor;
pub mod server;

pub use config::Settings;
pub use monitor::{
    EventType, FileEvent, FileReference, FileStats, FileType, MonitorConfig, MonitorId,
    MonitorState, MonitorType, PathMode,
};
pub use server::{
    ChannelSubscriber, DirectoryTarget, LoggingSubscriber, MonitorServer, Notification,
    ServerError, ServerResult, Subscriber, SubscriberError,
};
