//! Bridge between web content and host capabilities
//!
//! Content posts JSON request envelopes; the [`MessageRouter`] decides
//! whether the caller may run the command and always answers with a
//! response envelope.

pub mod command;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod router;

pub use command::{Command, Dispatch};
pub use envelope::{Reply, Request, RequestEnvelope, ResponseEnvelope, Timeline};
pub use error::CommandError;
pub use handlers::launch::{Launched, ProcessLauncher, SystemLauncher};
pub use handlers::window::{HeadlessWindow, Theme, WindowAction, WindowHost, WindowState};
pub use handlers::{CommandContext, MessageHandler};
pub use router::{DownloadRecord, MessageRouter};
