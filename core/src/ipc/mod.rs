//! The control-plane IPC surface (spec §4.5). `frame` defines the wire
//! shapes, `ops` is the closed operation dispatch table, `server` is the
//! transport that frames connections and drives `ops::dispatch`.

pub mod frame;
pub mod ops;
pub mod server;

pub use frame::{ClientFrame, ErrorBody, ServerFrame};
pub use ops::dispatch;
pub use server::serve;
