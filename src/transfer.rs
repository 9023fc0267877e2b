//! The file-transfer layer: START/DATA/END packets and the send/receive
//! loops that drive them across an established [`Link`].

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, info};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::frame;
use crate::link::Link;

/// Largest DATA payload carried by one packet. Chosen so a DATA packet
/// doubled by worst-case stuffing plus six framing bytes stays within a
/// conservative device MTU expectation.
pub const MAX_DATA_LEN: usize = 500;

const CONTROL_DATA: u8 = 1;
const CONTROL_START: u8 = 2;
const CONTROL_END: u8 = 3;

const FIELD_SIZE: u8 = 0;
const FIELD_NAME: u8 = 1;

/// One application packet. START announces a transfer, DATA carries file
/// bytes, END closes it echoing START's fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Start { size: u32, name: String },
    Data { payload: Vec<u8> },
    End { size: u32, name: String },
}

impl Packet {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::Start { size, name } => encode_control(CONTROL_START, *size, name),
            Packet::End { size, name } => encode_control(CONTROL_END, *size, name),
            Packet::Data { payload } => {
                let mut out = Vec::with_capacity(payload.len() + 3);
                out.push(CONTROL_DATA);
                out.push((payload.len() / 256) as u8);
                out.push((payload.len() % 256) as u8);
                out.extend_from_slice(payload);
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Packet> {
        let (&control, rest) = bytes
            .split_first()
            .ok_or(Error::MalformedPacket("empty packet"))?;
        match control {
            CONTROL_DATA => {
                if rest.len() < 2 {
                    return Err(Error::MalformedPacket("DATA packet shorter than its header"));
                }
                let announced = rest[0] as usize * 256 + rest[1] as usize;
                let payload = &rest[2..];
                if payload.len() != announced {
                    return Err(Error::MalformedPacket("DATA length field disagrees with payload"));
                }
                Ok(Packet::Data {
                    payload: payload.to_vec(),
                })
            }
            CONTROL_START => {
                let (size, name) = decode_control_fields(rest)?;
                Ok(Packet::Start { size, name })
            }
            CONTROL_END => {
                let (size, name) = decode_control_fields(rest)?;
                Ok(Packet::End { size, name })
            }
            other => Err(Error::UnknownPacket(other)),
        }
    }
}

fn encode_control(control: u8, size: u32, name: &str) -> Vec<u8> {
    let name = name.as_bytes();
    let mut out = Vec::with_capacity(9 + name.len());
    out.push(control);
    out.push(FIELD_SIZE);
    out.push(4);
    out.extend_from_slice(&size.to_be_bytes());
    out.push(FIELD_NAME);
    out.push(name.len() as u8);
    out.extend_from_slice(name);
    out
}

fn decode_control_fields(mut rest: &[u8]) -> Result<(u32, String)> {
    let mut size: Option<u32> = None;
    let mut name: Option<String> = None;
    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(Error::MalformedPacket("truncated field header"));
        }
        let (field, len) = (rest[0], rest[1] as usize);
        rest = &rest[2..];
        if rest.len() < len {
            return Err(Error::MalformedPacket("field overruns the packet"));
        }
        let (value, tail) = rest.split_at(len);
        rest = tail;
        match field {
            FIELD_SIZE => {
                if len != 4 {
                    return Err(Error::MalformedPacket("size field is not 4 bytes"));
                }
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(value);
                size = Some(u32::from_be_bytes(bytes));
            }
            FIELD_NAME => {
                name = Some(String::from_utf8_lossy(value).into_owned());
            }
            // unknown field types are skipped
            _ => {}
        }
    }
    match (size, name) {
        (Some(size), Some(name)) => Ok((size, name)),
        _ => Err(Error::MalformedPacket("missing size or name field")),
    }
}

/// Send the file at `path` across an established link: START, the DATA
/// packets, then END. Returns the number of file bytes transferred.
pub fn send_file<D: Device>(link: &mut Link<D>, path: &Path) -> Result<u32> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string();
    if name.len() > u8::MAX as usize {
        return Err(Error::NameTooLong(name.len()));
    }

    let mut file = File::open(path)?;
    let size = file.seek(SeekFrom::End(0))?;
    if size > u32::MAX as u64 {
        return Err(Error::FileTooLarge(size));
    }
    let size = size as u32;
    file.seek(SeekFrom::Start(0))?;

    info!("sending \"{}\", {} bytes", name, size);
    link.write(&Packet::Start {
        size,
        name: name.clone(),
    }
    .encode())?;

    let mut chunk = [0u8; MAX_DATA_LEN];
    let mut sent: u32 = 0;
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        link.write(&Packet::Data {
            payload: chunk[..n].to_vec(),
        }
        .encode())?;
        sent += n as u32;
        debug!("sent {}/{} bytes", sent, size);
    }

    link.write(&Packet::End { size, name }.encode())?;
    info!("transfer finished, {} bytes", sent);
    Ok(sent)
}

/// Receive one file over an established link and write it to `path`.
/// The first packet must be START; END terminates the transfer and must
/// echo START's fields. Returns the number of file bytes received.
pub fn receive_file<D: Device>(link: &mut Link<D>, path: &Path) -> Result<u32> {
    let mut buf = vec![0u8; frame::MAX_PAYLOAD];

    let n = link.read(&mut buf)?;
    let (size, name) = match Packet::decode(&buf[..n])? {
        Packet::Start { size, name } => (size, name),
        _ => return Err(Error::MissingStart),
    };
    info!("receiving \"{}\", {} bytes, into {}", name, size, path.display());

    let mut out = File::create(path)?;
    let mut received: u32 = 0;
    loop {
        let n = link.read(&mut buf)?;
        match Packet::decode(&buf[..n])? {
            Packet::Data { payload } => {
                out.write_all(&payload)?;
                received += payload.len() as u32;
                debug!("received {}/{} bytes", received, size);
            }
            Packet::End {
                size: end_size,
                name: end_name,
            } => {
                if end_size != size {
                    return Err(Error::TransferMismatch("size"));
                }
                if end_name != name {
                    return Err(Error::TransferMismatch("name"));
                }
                break;
            }
            Packet::Start { .. } => return Err(Error::UnexpectedPacket("START")),
        }
    }

    if received != size {
        return Err(Error::SizeMismatch {
            announced: size,
            actual: received,
        });
    }
    out.flush()?;
    info!("transfer complete, {} bytes", received);
    Ok(received)
}
