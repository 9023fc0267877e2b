#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
    use std::thread;
    use std::time::Duration;

    use sawlink::{receive_file, send_file, Device, Link, LinkConfig, LinkStats, Packet, Role};

    /// Two of these, cross-wired over channels, make an in-memory serial
    /// line between the transmitter and receiver threads.
    struct ChannelDevice {
        tx: Sender<u8>,
        rx: Receiver<u8>,
    }

    fn wire_pair() -> (ChannelDevice, ChannelDevice) {
        let (a_tx, b_rx) = channel();
        let (b_tx, a_rx) = channel();
        (
            ChannelDevice { tx: a_tx, rx: a_rx },
            ChannelDevice { tx: b_tx, rx: b_rx },
        )
    }

    impl Device for ChannelDevice {
        fn recv_byte(&mut self) -> io::Result<Option<u8>> {
            match self.rx.recv_timeout(Duration::from_millis(10)) {
                Ok(byte) => Ok(Some(byte)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer hung up",
                )),
            }
        }

        fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
            for &byte in bytes {
                self.tx
                    .send(byte)
                    .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer hung up"))?;
            }
            Ok(())
        }
    }

    /// Swallows whole outgoing frames by send index, to simulate loss on
    /// the line.
    struct LossyDevice {
        inner: ChannelDevice,
        drop_frames: Vec<usize>,
        sends: usize,
    }

    impl Device for LossyDevice {
        fn recv_byte(&mut self) -> io::Result<Option<u8>> {
            self.inner.recv_byte()
        }

        fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
            let index = self.sends;
            self.sends += 1;
            if self.drop_frames.contains(&index) {
                return Ok(());
            }
            self.inner.send(bytes)
        }
    }

    fn config(role: Role) -> LinkConfig {
        let mut config = LinkConfig::new("wire", role);
        config.timeout = Duration::from_millis(200);
        config.max_retries = 3;
        config
    }

    fn run_transfer<T, R>(tx_device: T, rx_device: R, content: &[u8]) -> (u32, u32, LinkStats)
    where
        T: Device + Send + 'static,
        R: Device + Send + 'static,
    {
        let _ = env_logger::builder().is_test(true).try_init();

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        let sink = dir.path().join("sink.bin");
        std::fs::write(&source, content).unwrap();

        let tx_thread = thread::spawn(move || {
            let mut link = Link::establish(tx_device, &config(Role::Transmitter)).unwrap();
            let sent = send_file(&mut link, &source).unwrap();
            let stats = link.stats();
            link.close(true).unwrap();
            (sent, stats)
        });
        let rx_thread = thread::spawn(move || {
            let mut link = Link::establish(rx_device, &config(Role::Receiver)).unwrap();
            let received = receive_file(&mut link, &sink).unwrap();
            link.close(false).unwrap();
            received
        });

        let (sent, stats) = tx_thread.join().unwrap();
        let received = rx_thread.join().unwrap();
        assert_eq!(std::fs::read(dir.path().join("sink.bin")).unwrap(), content);
        (sent, received, stats)
    }

    #[test]
    fn file_round_trip() {
        let (tx_device, rx_device) = wire_pair();
        let content: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
        let (sent, received, _) = run_transfer(tx_device, rx_device, &content);
        assert_eq!(sent, 1500);
        assert_eq!(received, 1500);
    }

    #[test]
    fn empty_file_round_trip() {
        let (tx_device, rx_device) = wire_pair();
        let (sent, received, _) = run_transfer(tx_device, rx_device, &[]);
        assert_eq!(sent, 0);
        assert_eq!(received, 0);
    }

    #[test]
    fn round_trip_survives_a_dropped_data_frame() {
        let (tx_device, rx_device) = wire_pair();
        // transmitter frame sends: 0 SET, 1 START, 2 first DATA; drop the
        // DATA frame and let the retransmission timer recover it
        let lossy = LossyDevice {
            inner: tx_device,
            drop_frames: vec![2],
            sends: 0,
        };
        let content: Vec<u8> = (0..800u32).map(|i| (i * 7 % 256) as u8).collect();
        let (sent, received, stats) = run_transfer(lossy, rx_device, &content);
        assert_eq!(sent, 800);
        assert_eq!(received, 800);
        assert!(stats.timeouts >= 1);
        assert!(stats.retransmissions >= 1);
    }

    #[test]
    fn round_trip_survives_a_lost_acknowledgement() {
        let (tx_device, rx_device) = wire_pair();
        // receiver frame sends: 0 UA, 1 RR answering START; drop that RR so
        // the transmitter repeats START and the receiver must suppress the
        // duplicate
        let lossy = LossyDevice {
            inner: rx_device,
            drop_frames: vec![1],
            sends: 0,
        };
        let content = b"eight by.".to_vec();
        let (sent, received, stats) = run_transfer(tx_device, lossy, &content);
        assert_eq!(sent, 9);
        assert_eq!(received, 9);
        assert!(stats.retransmissions >= 1);
    }

    #[test]
    fn start_packet_wire_layout() {
        let packet = Packet::Start {
            size: 0x0102_0304,
            name: "pic.png".into(),
        };
        let encoded = packet.encode();
        let mut expected = vec![2, 0, 4, 1, 2, 3, 4, 1, 7];
        expected.extend_from_slice(b"pic.png");
        assert_eq!(encoded, expected);
        assert_eq!(Packet::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn data_packet_length_uses_a_256_radix() {
        let payload = vec![0xab; 500];
        let encoded = Packet::Data {
            payload: payload.clone(),
        }
        .encode();
        assert_eq!(&encoded[..3], &[1, 1, 244][..]); // 500 = 1 * 256 + 244
        match Packet::decode(&encoded).unwrap() {
            Packet::Data { payload: decoded } => assert_eq!(decoded, payload),
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn end_packet_round_trips() {
        let packet = Packet::End {
            size: 42,
            name: "x".into(),
        };
        assert_eq!(Packet::decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn malformed_packets_are_rejected() {
        assert!(Packet::decode(&[]).is_err());
        assert!(Packet::decode(&[9, 0, 0]).is_err()); // unknown control byte
        assert!(Packet::decode(&[1, 0]).is_err()); // truncated DATA header
        assert!(Packet::decode(&[1, 0, 4, 0xaa]).is_err()); // length disagrees
        assert!(Packet::decode(&[2, 0, 4, 0, 0]).is_err()); // size field overruns
        assert!(Packet::decode(&[2, 0, 2, 0, 0]).is_err()); // size field not 4 bytes
        assert!(Packet::decode(&[2, 0, 4, 0, 0, 0, 9]).is_err()); // name missing
    }
}
