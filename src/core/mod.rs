//! Relay core: registry, command queue, dispatcher and streaming sessions.

pub mod bridge;
pub mod command;
pub mod dispatcher;
pub mod emission;
pub mod realtime;
pub mod registry;
pub mod session;

pub use bridge::RelayBridge;
pub use command::{Command, CommandQueue, CommandReceiver, CommandSender};
pub use dispatcher::{DEFAULT_SHUTDOWN_TIMEOUT, DispatcherThread, SessionDispatcher};
pub use emission::{Emission, EmissionSink};
pub use registry::{SessionId, SessionRegistry};
pub use session::{
    ResponseAccumulator, SessionExit, SessionInput, SessionOptions, SessionState,
    SessionTransition, StreamingSession,
};
