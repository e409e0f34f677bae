pub mod feed_port;
pub mod stream_supervisor;

pub use feed_port::{Feed, FeedError};
pub use stream_supervisor::{Pipeline, StreamSupervisor};
