//! # sawlink
//! A stop-and-wait data link for moving a file across an unreliable serial
//! line between exactly two endpoints, with HDLC-style framing.
//!
//! The stack has two layers. The link layer ([`Link`]) frames payloads
//! between `0x7E` flags with byte stuffing and two XOR checksums (BCC1
//! over the header, BCC2 over the payload), alternates one-bit sequence
//! numbers, and retransmits unacknowledged frames on REJ or timeout with
//! at most one frame in flight. The transfer layer ([`transfer`]) chops a
//! file into START/DATA/END packets on top of it, so the receiver can
//! rebuild the file bit-identically.
//!
//! The hardware sits behind the [`Device`] trait; [`SerialDevice`] is the
//! serial port implementation, and tests drive the protocol over
//! in-memory devices.
//!
//! ## Example
//! ```no_run
//! use std::path::Path;
//! use std::time::Duration;
//! use sawlink::{transfer, Link, LinkConfig, Role};
//!
//! fn main() -> Result<(), sawlink::Error> {
//!     let mut config = LinkConfig::new("/dev/ttyS0", Role::Transmitter);
//!     config.timeout = Duration::from_secs(3);
//!     config.max_retries = 3;
//!
//!     let mut link = Link::open(&config)?;
//!     transfer::send_file(&mut link, Path::new("picture.png"))?;
//!     link.close(true)?;
//!     Ok(())
//! }
//! ```
//!
//! The other endpoint runs the same way with [`Role::Receiver`] and
//! [`transfer::receive_file`].

pub mod device;
pub mod error;
pub mod frame;
pub mod link;
pub mod transfer;

pub use device::{Device, SerialDevice};
pub use error::{Error, Result};
pub use frame::{Control, Seq};
pub use link::{Link, LinkConfig, LinkStats, Role};
pub use transfer::{receive_file, send_file, Packet};
