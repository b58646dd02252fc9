//! Synthetic message production engine.
//!
//! Builds failed/processed message envelopes from an endpoint template,
//! attaches exception contexts captured from a real failing call chain and
//! dispatches them through a [`datagen_bus::Dispatcher`] while an admission
//! limiter bounds the number of in-flight sends.
pub mod clock;
pub mod envelope;
pub mod error;
pub mod exceptions;
pub mod generator;
pub mod payload;
pub mod progress;

pub use clock::{Clock, FixedClock, SystemClock};
pub use envelope::{
    EnvelopeOverrides, EnvelopeStyle, EnvelopeTemplate, ExceptionHeaders, MessageEnvelope,
    MessageIntent, headers, to_wire_time,
};
pub use error::{CatalogError, GeneratorError};
pub use exceptions::{CHAIN_DEPTH, ExceptionCatalog, ExceptionContext, ExceptionKind};
pub use generator::{
    Generator, GeneratorConfig, MessageFlavor, RunMode, RunPhase, RunSummary, StopHandle,
};
pub use payload::{DEFAULT_PAYLOAD_PADDING, Payload};
pub use progress::{ProgressReporter, ProgressUnit};
