//! End-to-end transfer over an in-memory radio pair.
//!
//! A sender and a receiver run on separate threads connected by a
//! `ChannelLink`, exercising the full protocol: handshake, channel shift,
//! data streaming with an injected ACK loss, EOF and finalize.

use std::thread;
use std::time::Duration;

use flxota::link::mem::DEFAULT_FREQUENCY_HZ;
use flxota::{
    ChannelLink, HostLine, Inbound, MemoryFlash, NodePlatform, RadioLink, Receiver,
    ReceiverConfig, Result, Sender, SenderConfig, TargetClass, image,
};

const PROGRAMMER_ID: u16 = 1;
const TARGET_ID: u16 = 2;

// 2 data bytes per record, valid checksums; decoded image: 01 02 03 04 05 06
const RECORD_LINES: &[&str] = &[
    "FLX:0:020000000102FB",
    "FLX:1:020002000304F5",
    "FLX:2:020004000506EF",
];

/// Host double feeding the scripted image and collecting echoes.
struct ScriptHost {
    lines: Vec<String>,
    cursor: usize,
    echoed: Vec<String>,
}

impl HostLine for ScriptHost {
    fn read_line(&mut self, buf: &mut String, _timeout: Duration) -> Result<usize> {
        if self.cursor < self.lines.len() {
            buf.push_str(&self.lines[self.cursor]);
            self.cursor += 1;
            Ok(buf.len())
        } else {
            Ok(0)
        }
    }
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.echoed.push(line.to_owned());
        Ok(())
    }
}

#[derive(Default)]
struct CountingPlatform {
    reboots: u32,
}

impl NodePlatform for CountingPlatform {
    fn reboot(&mut self) {
        self.reboots += 1;
    }
}

fn spawn_receiver(
    mut link: ChannelLink,
) -> thread::JoinHandle<(Result<Option<u32>>, MemoryFlash, u32)> {
    thread::spawn(move || {
        let mut flash = MemoryFlash::new(64 * 1024, 0xEF30);
        let mut platform = CountingPlatform::default();

        // the firmware main loop: wait for any packet, hand it over
        let pkt: Inbound = loop {
            if let Some(p) = link.receive().expect("link alive") {
                break p;
            }
            thread::sleep(Duration::from_millis(1));
        };

        let config = ReceiverConfig {
            class: TargetClass::Standard,
            timeout: Duration::from_secs(2),
            ..ReceiverConfig::default()
        };
        let result = Receiver::with_config(&mut link, &mut flash, &mut platform, config)
            .check_inbound(&pkt);
        (result, flash, platform.reboots)
    })
}

fn sender_config() -> SenderConfig {
    SenderConfig {
        timeout: Duration::from_secs(2),
        ack_timeout: Duration::from_millis(100),
        line_timeout: Duration::from_millis(5),
        ..SenderConfig::default()
    }
}

#[test]
fn test_three_record_image_with_lost_ack() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (mut tx_link, mut rx_link) = ChannelLink::pair(PROGRAMMER_ID, TARGET_ID);

    // lose the first copy of the target's FLX:1:OK: outgoing ACKs are
    // FLX?OK (0), FLX:0:OK (1), FLX:1:OK (2), ...
    rx_link.drop_ack(2);

    let receiver = spawn_receiver(rx_link);

    let mut lines: Vec<String> = RECORD_LINES.iter().map(|l| (*l).to_owned()).collect();
    lines.push("FLX?EOF".to_owned());
    let mut host = ScriptHost {
        lines,
        cursor: 0,
        echoed: Vec::new(),
    };

    let sent = Sender::with_config(&mut tx_link, &mut host, sender_config())
        .check_for_serial_hex("FLX?", TARGET_ID)
        .expect("transfer should survive one lost ACK");
    assert!(sent);

    // every record acknowledged exactly once toward the host
    assert_eq!(
        host.echoed,
        vec!["FLX?OK", "FLX:0:OK", "FLX:1:OK", "FLX:2:OK", "FLX?OK"]
    );

    let (result, mut flash, reboots) = receiver.join().expect("receiver thread");
    assert_eq!(result.expect("session completes"), Some(6));
    assert_eq!(reboots, 1);

    // the retransmitted packet 1 did not duplicate its two bytes
    let layout = TargetClass::Standard.layout();
    assert_eq!(image::read_payload_len(&mut flash, &layout).unwrap(), Some(6));
    assert_eq!(
        &flash.contents()[10..16],
        &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]
    );
    // nothing was written past the finalized image
    assert_eq!(flash.contents()[16], 0xFF);

    // both ends are back on the control channel
    assert_eq!(tx_link.frequency_hz(), DEFAULT_FREQUENCY_HZ);
    assert_eq!(tx_link.peer_frequency_hz(), DEFAULT_FREQUENCY_HZ);
}

#[test]
fn test_transfer_without_channel_shift() {
    let (mut tx_link, rx_link) = ChannelLink::pair(PROGRAMMER_ID, TARGET_ID);

    let receiver = thread::spawn(move || {
        let mut link = rx_link;
        let mut flash = MemoryFlash::new(64 * 1024, 0xEF30);
        let mut platform = CountingPlatform::default();
        let pkt = loop {
            if let Some(p) = link.receive().expect("link alive") {
                break p;
            }
            thread::sleep(Duration::from_millis(1));
        };
        let config = ReceiverConfig {
            timeout: Duration::from_secs(2),
            shift_channel_hz: None,
            ..ReceiverConfig::default()
        };
        let result = Receiver::with_config(&mut link, &mut flash, &mut platform, config)
            .check_inbound(&pkt);
        result.map(|len| (len, flash.contents()[10]))
    });

    let mut host = ScriptHost {
        lines: vec![RECORD_LINES[0].to_owned(), "FLX?EOF".to_owned()],
        cursor: 0,
        echoed: Vec::new(),
    };
    let config = SenderConfig {
        shift_channel_hz: None,
        ..sender_config()
    };
    let sent = Sender::with_config(&mut tx_link, &mut host, config)
        .check_for_serial_hex("FLX?", TARGET_ID)
        .expect("plain-channel transfer");
    assert!(sent);

    let (len, first_byte) = receiver.join().expect("receiver thread").unwrap();
    assert_eq!(len, Some(2));
    assert_eq!(first_byte, 0x01);
}
