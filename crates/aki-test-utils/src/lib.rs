// aki-test-utils: Shared test utilities for the AKI monitor.
//
// Provides a scriptable MLLP producer and a scriptable pager endpoint for
// integration testing of the ingest pipeline.

pub mod mllp_producer;
pub mod pager_stub;

pub use mllp_producer::{MllpProducer, ProducerStep};
pub use pager_stub::PagerStub;
