//! A two-erasure XOR forward-error-correction codec for fixed-layout
//! datagram streams.
//!
//! [`EncodeBuffer`] accepts data items one at a time and emits a framed
//! stream of data, horizontal-parity (P), and diagonal-parity (Q) frames.
//! [`DecodeBuffer`] consumes that stream in channel order and reconstructs
//! the original items even if up to two frames per parity group are lost.
//!
//! The construction follows the EVENODD family of codes: for a parity group
//! size `N`, `N + 1` must be prime.

mod block;
mod buffer;
mod decode;
mod encode;
mod frame;
mod params;
mod raw;
mod status;

pub use buffer::{Buff, BuffMut};
pub use decode::DecodeBuffer;
pub use encode::EncodeBuffer;
pub use frame::{FrameError, Header, StreamData};
pub use status::Status;
