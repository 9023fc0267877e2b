//! Frame codec: protocol constants, the control-field sum type, BCC
//! checksums, byte stuffing and the per-byte receive state machine.

use std::mem;

use log::{trace, warn};

/// Frame delimiter.
pub const FLAG: u8 = 0x7e;
/// Stuffing prefix; the byte after it travels XORed with 0x20.
pub const ESCAPE: u8 = 0x7d;
/// Applied to a stuffed byte to restore it.
const STUFF_MASK: u8 = 0x20;
/// Address field. Both directions of this point-to-point link use it.
pub const ADDRESS: u8 = 0x03;

/// Upper bound on an information frame payload, before stuffing.
pub const MAX_PAYLOAD: usize = 512;

// Largest stuffed body we will buffer: every payload byte plus the
// trailing BCC2 escaped.
const MAX_BODY: usize = (MAX_PAYLOAD + 1) * 2;

// Control field values.
const C_SET: u8 = 0x03;
const C_UA: u8 = 0x07;
const C_DISC: u8 = 0x0b;
const C_RR_0: u8 = 0x05;
const C_RR_1: u8 = 0x85;
const C_REJ_0: u8 = 0x01;
const C_REJ_1: u8 = 0x81;
const C_I_0: u8 = 0x00;
const C_I_1: u8 = 0x40;

/// One-bit sequence number carried by I, RR and REJ frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seq {
    Zero,
    One,
}

impl Seq {
    pub fn toggled(self) -> Seq {
        match self {
            Seq::Zero => Seq::One,
            Seq::One => Seq::Zero,
        }
    }
}

/// The closed set of frame kinds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Connection request.
    Set,
    /// Unnumbered acknowledgement.
    Ua,
    /// Disconnect request.
    Disc,
    /// Receive-ready: positive acknowledgement, ready for sequence `n`.
    Rr(Seq),
    /// Reject: resend the frame with sequence `n`.
    Rej(Seq),
    /// Information frame carrying a payload under sequence `s`.
    Info(Seq),
}

impl Control {
    pub fn byte(self) -> u8 {
        match self {
            Control::Set => C_SET,
            Control::Ua => C_UA,
            Control::Disc => C_DISC,
            Control::Rr(Seq::Zero) => C_RR_0,
            Control::Rr(Seq::One) => C_RR_1,
            Control::Rej(Seq::Zero) => C_REJ_0,
            Control::Rej(Seq::One) => C_REJ_1,
            Control::Info(Seq::Zero) => C_I_0,
            Control::Info(Seq::One) => C_I_1,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Control> {
        match byte {
            C_SET => Some(Control::Set),
            C_UA => Some(Control::Ua),
            C_DISC => Some(Control::Disc),
            C_RR_0 => Some(Control::Rr(Seq::Zero)),
            C_RR_1 => Some(Control::Rr(Seq::One)),
            C_REJ_0 => Some(Control::Rej(Seq::Zero)),
            C_REJ_1 => Some(Control::Rej(Seq::One)),
            C_I_0 => Some(Control::Info(Seq::Zero)),
            C_I_1 => Some(Control::Info(Seq::One)),
            _ => None,
        }
    }
}

/// XOR fold of the payload bytes.
pub fn bcc2(payload: &[u8]) -> u8 {
    payload.iter().fold(0, |acc, byte| acc ^ byte)
}

/// Append `src` to `out`, escaping every FLAG and ESCAPE occurrence.
pub fn stuff(src: &[u8], out: &mut Vec<u8>) {
    for &byte in src {
        if byte == FLAG || byte == ESCAPE {
            out.push(ESCAPE);
            out.push(byte ^ STUFF_MASK);
        } else {
            out.push(byte);
        }
    }
}

/// Undo [`stuff`]. `None` if the input ends in a dangling ESCAPE.
pub fn destuff(src: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(src.len());
    let mut bytes = src.iter();
    while let Some(&byte) = bytes.next() {
        if byte == ESCAPE {
            out.push(bytes.next()? ^ STUFF_MASK);
        } else {
            out.push(byte);
        }
    }
    Some(out)
}

/// Serialize a supervisory frame. Five bytes, never stuffed: no field of a
/// supervisory frame can equal FLAG or ESCAPE.
pub fn supervisory(control: Control) -> [u8; 5] {
    let c = control.byte();
    [FLAG, ADDRESS, c, ADDRESS ^ c, FLAG]
}

/// Serialize an information frame carrying `payload` under sequence `seq`.
/// The payload and its BCC2 are stuffed; header and flags are not.
pub fn information(seq: Seq, payload: &[u8]) -> Vec<u8> {
    let c = Control::Info(seq).byte();
    let mut out = Vec::with_capacity(payload.len() * 2 + 8);
    out.push(FLAG);
    out.push(ADDRESS);
    out.push(c);
    out.push(ADDRESS ^ c);
    stuff(payload, &mut out);
    stuff(&[bcc2(payload)], &mut out);
    out.push(FLAG);
    out
}

/// A complete frame surfaced by [`FrameReader`]. `body` is the still-stuffed
/// payload and BCC2 of an information frame; empty for supervisory frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub control: Control,
    pub body: Vec<u8>,
}

/// Receiving state machine, one transition per incoming byte.
enum RxState {
    SearchingForFlag,
    ReceivingAddress,
    ReceivingControl,
    ReceivingBcc1,
    ReceivingBody,
}

/// Incremental frame parser. Feed it bytes as they arrive; a complete frame
/// with a valid header checksum is returned from the closing-flag transition.
/// Corrupted headers and stray bytes are dropped silently and the parser
/// resynchronizes on the next FLAG.
pub struct FrameReader {
    state: RxState,
    control: Control,
    body: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        FrameReader {
            state: RxState::SearchingForFlag,
            control: Control::Set,
            body: Vec::new(),
        }
    }

    /// Feed one byte; returns a complete frame when this byte ends one.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            RxState::SearchingForFlag => {
                if byte == FLAG {
                    self.state = RxState::ReceivingAddress;
                }
            }
            RxState::ReceivingAddress => {
                if byte == ADDRESS {
                    self.state = RxState::ReceivingControl;
                } else if byte != FLAG {
                    // repeated flags keep us waiting for the address
                    self.state = RxState::SearchingForFlag;
                }
            }
            RxState::ReceivingControl => match Control::from_byte(byte) {
                Some(control) => {
                    self.control = control;
                    self.state = RxState::ReceivingBcc1;
                }
                None if byte == FLAG => self.state = RxState::ReceivingAddress,
                None => self.state = RxState::SearchingForFlag,
            },
            RxState::ReceivingBcc1 => {
                if byte == (ADDRESS ^ self.control.byte()) {
                    self.body.clear();
                    self.state = RxState::ReceivingBody;
                } else if byte == FLAG {
                    self.state = RxState::ReceivingAddress;
                } else {
                    trace!("header checksum mismatch, resynchronizing");
                    self.state = RxState::SearchingForFlag;
                }
            }
            RxState::ReceivingBody => {
                if byte == FLAG {
                    // The closing flag doubles as the next opening flag.
                    self.state = RxState::ReceivingAddress;
                    return Some(Frame {
                        control: self.control,
                        body: mem::replace(&mut self.body, Vec::new()),
                    });
                }
                if self.body.len() >= MAX_BODY {
                    warn!("frame longer than any we can buffer, dropped");
                    self.body.clear();
                    self.state = RxState::SearchingForFlag;
                } else {
                    self.body.push(byte);
                }
            }
        }
        None
    }
}
