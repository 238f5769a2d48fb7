//! Asynchronous utilities for use with Tokio.
//!
//! Everything in this tool runs as a single sequential chain of awaits, but
//! we still use Tokio for network and file I/O, and streams to hand records
//! from one stage to the next.

use std::pin::Pin;

use futures::Stream;

pub mod io;

/// A type alias for a boxed stream. This is used to make it easier to work
/// streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;
