//! Message representation: frames, flags and identity blobs.

mod blob;
mod flags;
mod msg;

pub use blob::Blob;
pub use flags::{MsgFlags, SocketFlags};
pub use msg::Msg;
