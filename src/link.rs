//! The link-layer connection: establishment, acknowledged delivery with
//! retransmission, and orderly disconnection over a [`Device`].

use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::device::{Device, SerialDevice};
use crate::error::{Error, Result};
use crate::frame::{self, Control, Frame, FrameReader, Seq};

// Inter-byte timeout handed to the serial port; the granularity at which
// blocked reads notice an expired retransmission deadline.
const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Which end of the point-to-point link this endpoint is. The transmitter
/// initiates establishment and disconnection; the receiver answers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Transmitter,
    Receiver,
}

/// Connection parameters, immutable once the link is open.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Serial device path, e.g. `/dev/ttyS0`.
    pub port: String,
    pub baud_rate: u32,
    pub role: Role,
    /// How long one transmit-and-await cycle waits for a reply.
    pub timeout: Duration,
    /// Retransmissions allowed per exchange before the call fails.
    pub max_retries: u32,
}

impl LinkConfig {
    pub fn new(port: impl Into<String>, role: Role) -> Self {
        LinkConfig {
            port: port.into(),
            baud_rate: 38_400,
            role,
            timeout: Duration::from_secs(3),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Established,
    Closing,
    Closed,
}

/// Counters kept across the connection lifetime, reported by
/// [`Link::close`] when asked for and available through [`Link::stats`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkStats {
    pub frames_sent: u32,
    pub frames_received: u32,
    pub retransmissions: u32,
    pub timeouts: u32,
    pub rejects_sent: u32,
    pub rejects_received: u32,
    pub duplicates_dropped: u32,
    pub bad_checksums: u32,
}

/// One end of an established link. Created by [`Link::open`] (serial) or
/// [`Link::establish`] (any [`Device`]); destroyed by [`Link::close`],
/// which releases the device on every path.
pub struct Link<D: Device> {
    device: D,
    role: Role,
    timeout: Duration,
    max_retries: u32,
    state: ConnState,
    /// Sequence number of the next I-frame we send.
    tx_seq: Seq,
    /// Sequence number we expect on the next new I-frame.
    rx_seq: Seq,
    reader: FrameReader,
    stats: LinkStats,
}

impl<D: Device> std::fmt::Debug for Link<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("role", &self.role)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("state", &self.state)
            .field("tx_seq", &self.tx_seq)
            .field("rx_seq", &self.rx_seq)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Link<SerialDevice> {
    /// Open the serial port named by `config` and establish the link.
    pub fn open(config: &LinkConfig) -> Result<Self> {
        let device = SerialDevice::open(&config.port, config.baud_rate, SERIAL_READ_TIMEOUT)?;
        Self::establish(device, config)
    }
}

impl<D: Device> Link<D> {
    /// Establish the link over an already-open device: the transmitter
    /// sends SET and awaits UA under the retry policy; the receiver blocks
    /// for SET and acknowledges it.
    pub fn establish(device: D, config: &LinkConfig) -> Result<Self> {
        let mut link = Link {
            device,
            role: config.role,
            timeout: config.timeout,
            max_retries: config.max_retries,
            state: ConnState::Closed,
            tx_seq: Seq::Zero,
            rx_seq: Seq::Zero,
            reader: FrameReader::new(),
            stats: LinkStats::default(),
        };
        match link.role {
            Role::Transmitter => link.connect()?,
            Role::Receiver => link.accept()?,
        }
        link.state = ConnState::Established;
        Ok(link)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Send one payload as an information frame and block until it is
    /// positively acknowledged. Returns the payload length.
    ///
    /// A REJ retransmits immediately; a timeout retransmits when it fires.
    /// Either consumes one unit of the retransmission budget, and once the
    /// budget is gone the call fails.
    pub fn write(&mut self, payload: &[u8]) -> Result<usize> {
        if self.state != ConnState::Established {
            return Err(Error::NotEstablished);
        }
        if self.role != Role::Transmitter {
            return Err(Error::WrongRole("write"));
        }
        if payload.len() > frame::MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                max: frame::MAX_PAYLOAD,
            });
        }

        let iframe = frame::information(self.tx_seq, payload);
        let acked = self.tx_seq.toggled();
        let mut attempts: u32 = 0;
        loop {
            if attempts > 0 {
                self.stats.retransmissions += 1;
            }
            self.device.send(&iframe)?;
            self.stats.frames_sent += 1;
            debug!(
                "I-frame {:?} sent, {} bytes (attempt {})",
                self.tx_seq,
                payload.len(),
                attempts + 1
            );

            let deadline = Instant::now() + self.timeout;
            let mut resend = false;
            while !resend {
                match self.read_frame_until(deadline)? {
                    Some(reply) => match reply.control {
                        Control::Rr(n) if n == acked => {
                            trace!("RR({:?}) received, payload acknowledged", n);
                            self.tx_seq = acked;
                            return Ok(payload.len());
                        }
                        Control::Rr(n) => {
                            // stale acknowledgement of the previous frame
                            trace!("duplicate RR({:?}) ignored", n);
                        }
                        Control::Rej(n) if n == self.tx_seq => {
                            warn!("REJ({:?}) received, retransmitting", n);
                            self.stats.rejects_received += 1;
                            resend = true;
                        }
                        other => trace!("ignoring {:?} while awaiting acknowledgement", other),
                    },
                    None => {
                        self.stats.timeouts += 1;
                        warn!("no acknowledgement of I-frame {:?} in time", self.tx_seq);
                        resend = true;
                    }
                }
            }
            attempts += 1;
            if attempts > self.max_retries {
                return Err(Error::RetriesExhausted(attempts));
            }
        }
    }

    /// Block until the next new payload arrives, write it into `buf` and
    /// return its length. Duplicates are re-acknowledged and suppressed;
    /// corrupted frames are rejected and awaited again.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.state != ConnState::Established {
            return Err(Error::NotEstablished);
        }
        if self.role != Role::Receiver {
            return Err(Error::WrongRole("read"));
        }

        loop {
            let received = self.read_frame()?;
            match received.control {
                Control::Info(s) => {
                    if let Some(payload) = self.check_information(s, &received.body)? {
                        if payload.len() > buf.len() {
                            // Not acknowledged: the peer will retransmit and
                            // the caller may retry with a larger buffer.
                            return Err(Error::BufferTooSmall {
                                needed: payload.len(),
                            });
                        }
                        buf[..payload.len()].copy_from_slice(&payload);
                        self.rx_seq = self.rx_seq.toggled();
                        self.send_supervisory(Control::Rr(self.rx_seq))?;
                        debug!("I-frame {:?} delivered, {} bytes", s, payload.len());
                        return Ok(payload.len());
                    }
                }
                Control::Set if received.body.is_empty() => {
                    // Our UA was lost and the peer is still opening.
                    debug!("duplicate SET, acknowledging again");
                    self.send_supervisory(Control::Ua)?;
                }
                other => trace!("ignoring {:?} while awaiting data", other),
            }
        }
    }

    /// Terminate the link with the DISC handshake and release the device.
    /// Consumes the link: the device is dropped on every path, success or
    /// failure. Logs the connection statistics when `show_stats` is set.
    pub fn close(mut self, show_stats: bool) -> Result<()> {
        self.state = ConnState::Closing;
        let result = match self.role {
            Role::Transmitter => self.shutdown_transmitter(),
            Role::Receiver => self.shutdown_receiver(),
        };
        self.state = ConnState::Closed;
        if show_stats {
            let s = &self.stats;
            info!(
                "link closed: {} frames sent, {} received, {} retransmissions, \
                 {} timeouts, {} REJs sent, {} REJs received, {} duplicates dropped, \
                 {} bad checksums",
                s.frames_sent,
                s.frames_received,
                s.retransmissions,
                s.timeouts,
                s.rejects_sent,
                s.rejects_received,
                s.duplicates_dropped,
                s.bad_checksums
            );
        }
        result
    }

    /// Transmitter establishment: SET, await UA, retransmitting on timeout.
    fn connect(&mut self) -> Result<()> {
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                self.stats.retransmissions += 1;
            }
            self.send_supervisory(Control::Set)?;
            debug!("SET sent (attempt {})", attempt + 1);

            let deadline = Instant::now() + self.timeout;
            while let Some(reply) = self.read_frame_until(deadline)? {
                match reply.control {
                    Control::Ua if reply.body.is_empty() => {
                        debug!("UA received, link established");
                        return Ok(());
                    }
                    other => trace!("ignoring {:?} while awaiting UA", other),
                }
            }
            self.stats.timeouts += 1;
            warn!("no UA in time");
        }
        Err(Error::RetriesExhausted(self.max_retries + 1))
    }

    /// Receiver establishment: block for SET, acknowledge it.
    fn accept(&mut self) -> Result<()> {
        loop {
            let received = self.read_frame()?;
            match received.control {
                Control::Set if received.body.is_empty() => {
                    debug!("SET received, acknowledging");
                    self.send_supervisory(Control::Ua)?;
                    return Ok(());
                }
                other => trace!("ignoring {:?} while awaiting SET", other),
            }
        }
    }

    /// Transmitter teardown: DISC, await the DISC reply, answer it with UA.
    fn shutdown_transmitter(&mut self) -> Result<()> {
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                self.stats.retransmissions += 1;
            }
            self.send_supervisory(Control::Disc)?;
            debug!("DISC sent (attempt {})", attempt + 1);

            let deadline = Instant::now() + self.timeout;
            while let Some(reply) = self.read_frame_until(deadline)? {
                match reply.control {
                    Control::Disc if reply.body.is_empty() => {
                        self.send_supervisory(Control::Ua)?;
                        debug!("disconnect complete");
                        return Ok(());
                    }
                    other => trace!("ignoring {:?} while awaiting DISC", other),
                }
            }
            self.stats.timeouts += 1;
            warn!("no DISC reply in time");
        }
        Err(Error::RetriesExhausted(self.max_retries + 1))
    }

    /// Receiver teardown: block for DISC, reply DISC, await the final UA.
    fn shutdown_receiver(&mut self) -> Result<()> {
        loop {
            let received = self.read_frame()?;
            match received.control {
                Control::Disc if received.body.is_empty() => break,
                Control::Info(s) if s != self.rx_seq => {
                    // The peer's final RR was lost and it is retransmitting
                    // its last frame; re-acknowledge so its write completes.
                    let _ = self.check_information(s, &received.body)?;
                }
                other => trace!("ignoring {:?} while awaiting DISC", other),
            }
        }
        debug!("DISC received, replying");

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                self.stats.retransmissions += 1;
            }
            self.send_supervisory(Control::Disc)?;

            let deadline = Instant::now() + self.timeout;
            let mut resend = false;
            while !resend {
                match self.read_frame_until(deadline)? {
                    Some(reply) => match reply.control {
                        Control::Ua if reply.body.is_empty() => {
                            debug!("disconnect complete");
                            return Ok(());
                        }
                        Control::Disc if reply.body.is_empty() => {
                            // our DISC reply was lost; answer again
                            resend = true;
                        }
                        other => trace!("ignoring {:?} while awaiting UA", other),
                    },
                    None => {
                        self.stats.timeouts += 1;
                        warn!("no UA in time");
                        resend = true;
                    }
                }
            }
        }
        Err(Error::RetriesExhausted(self.max_retries + 1))
    }

    /// Validate one received I-frame body: destuff, check BCC2, filter
    /// duplicates. Emits REJ for corruption and a repeated RR for a
    /// duplicate. Returns the payload only when the frame is new and
    /// intact; acknowledging it is the caller's job.
    fn check_information(&mut self, s: Seq, body: &[u8]) -> Result<Option<Vec<u8>>> {
        let decoded = frame::destuff(body);
        let (received_bcc2, payload) = match decoded.as_ref().and_then(|d| d.split_last()) {
            Some(split) => split,
            None => {
                warn!("malformed I-frame {:?}, rejecting", s);
                self.stats.bad_checksums += 1;
                self.stats.rejects_sent += 1;
                self.send_supervisory(Control::Rej(s))?;
                return Ok(None);
            }
        };
        if frame::bcc2(payload) != *received_bcc2 {
            warn!("BCC2 mismatch on I-frame {:?}, rejecting", s);
            self.stats.bad_checksums += 1;
            self.stats.rejects_sent += 1;
            self.send_supervisory(Control::Rej(s))?;
            return Ok(None);
        }
        if s != self.rx_seq {
            // Duplicate of the frame we already delivered: its RR was lost.
            debug!("duplicate I-frame {:?} dropped, re-acknowledging", s);
            self.stats.duplicates_dropped += 1;
            self.send_supervisory(Control::Rr(s.toggled()))?;
            return Ok(None);
        }
        Ok(Some(payload.to_vec()))
    }

    fn send_supervisory(&mut self, control: Control) -> Result<()> {
        self.device.send(&frame::supervisory(control))?;
        self.stats.frames_sent += 1;
        trace!("{:?} sent", control);
        Ok(())
    }

    /// Pump the device until a complete frame arrives or `deadline` passes.
    /// A zero-byte device read is the timer tick that lets the deadline be
    /// observed while blocked.
    fn read_frame_until(&mut self, deadline: Instant) -> Result<Option<Frame>> {
        while Instant::now() < deadline {
            if let Some(byte) = self.device.recv_byte()? {
                if let Some(received) = self.reader.push(byte) {
                    self.stats.frames_received += 1;
                    return Ok(Some(received));
                }
            }
        }
        Ok(None)
    }

    /// Pump the device until a complete frame arrives. Only device errors
    /// end the wait.
    fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(byte) = self.device.recv_byte()? {
                if let Some(received) = self.reader.push(byte) {
                    self.stats.frames_received += 1;
                    return Ok(received);
                }
            }
        }
    }
}
