//! Wire format used by the stream engines: a fixed greeting that carries
//! the peer identity, followed by length-prefixed frames.

mod codec;
mod greeting;

pub(crate) use codec::FrameCodec;
pub(crate) use greeting::{Greeting, GreetingDecoder, GREETING_HEADER_SIZE};
