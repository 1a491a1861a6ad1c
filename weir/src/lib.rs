//! # Flow-controlled channels
//!
//! Readable, writable and duplex channels with bounded buffers and backpressure,
//! plus pipes connecting one readable channel to several writable channels.
//!
//! A producer pushes chunks into a [Readable]; a consumer either receives them as
//! they arrive (flowing mode) or pulls them with [Readable::read] (paused mode).
//! A [Writable] hands chunks to a [Sink] one at a time and reports backpressure
//! by returning false from [Writable::write] once its buffer reaches the
//! high-water mark, followed by exactly one `drain` notification when the buffer
//! was flushed.
//!
//! All deferred work runs on an explicit single-threaded [Scheduler]; no data or
//! notification is ever delivered synchronously from within the call that caused it.
//!
//! ```
//! use weir::{Cfg, FnSink, Readable, Scheduler, Writable};
//! use std::{cell::RefCell, rc::Rc};
//!
//! let sched = Scheduler::new();
//! let received = Rc::new(RefCell::new(Vec::new()));
//!
//! let src = Readable::new(&sched, Cfg::object());
//! let dst = Writable::new(&sched, Cfg::object(), FnSink({
//!     let received = received.clone();
//!     move |chunk: Vec<u8>, done: weir::Done| {
//!         received.borrow_mut().push(chunk);
//!         done.ok();
//!     }
//! }));
//!
//! src.pipe(&dst);
//! src.push(b"hello".to_vec()).unwrap();
//! src.push_eof().unwrap();
//! sched.run_until_idle();
//!
//! assert_eq!(*received.borrow(), vec![b"hello".to_vec()]);
//! assert!(dst.is_finished());
//! ```

mod buffer;
mod cfg;
mod chunk;
mod decoder;
mod destroy;
mod done;
mod duplex;
mod error;
mod event;
mod finished;
mod readable;
mod readable_stream;
mod sched;
mod transform;
mod writable;
mod writable_sink;

pub mod pipe;

pub use buffer::ChunkBuffer;
pub use cfg::{Cfg, DuplexCfg, Encoding, DEFAULT_HIGH_WATER_MARK, DEFAULT_OBJECT_HIGH_WATER_MARK};
pub use chunk::Chunk;
pub use decoder::{Decoder, TextDecoder};
pub use done::Done;
pub use duplex::Duplex;
pub use error::{ProtocolViolation, StreamError};
pub use event::ListenerId;
pub use finished::Finished;
pub use pipe::{PipeDestination, PipeOpts, PipeRegistry};
pub use readable::{FnSource, PushSource, Readable, ReadableState, Source};
pub use readable_stream::ReadableStream;
pub use sched::{ChannelId, Scheduler};
pub use transform::{PassThrough, Transform};
pub use writable::{FnSink, Sink, Writable, WritableState};
pub use writable_sink::WritableSink;
