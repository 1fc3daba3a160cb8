//! Test doubles for the client's injectable seams.
//!
//! Public so downstream crates can drive a [`DeviceClient`](crate::DeviceClient)
//! in their own tests without a broker.

mod mocks;

pub use mocks::{
    ConnectionEvent, FixedClock, InlineExecutor, MockTransport, PublishRecord,
    RecordingConnectionCallback,
};
