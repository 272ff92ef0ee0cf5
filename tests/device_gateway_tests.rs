use eps_app::config::DeviceConfig;
use eps_app::device::frame::{self, DeviceCommand, FrameError, CMD_FRAME_SIZE};
use eps_app::device::sim::{
    CFG_POWER_SAVE, CFG_SOLAR_ENABLE, STATUS_SOLAR_ACTIVE, STATUS_SWITCH_SHIFT,
};
use eps_app::device::{
    DataFields, DeviceError, DeviceFault, DeviceGateway, DeviceHandle, DeviceLink, HkFields,
    LinkError, SerialGateway, Session, SimulatedEps, SWITCH_OFF, SWITCH_ON,
};
use std::collections::VecDeque;

fn gateway() -> SerialGateway<SimulatedEps> {
    let config = DeviceConfig {
        read_poll_budget: 8,
        ..DeviceConfig::default()
    };
    SerialGateway::new(SimulatedEps::new(), config)
}

#[test]
fn test_open_and_close_session() {
    let mut gw = gateway();

    let session = gw.open().unwrap();
    assert_eq!(session.handle(), gw.handle());
    assert_eq!(session.port(), DeviceConfig::default().port);
    assert!(gw.link().is_open());

    gw.close(&session).unwrap();
    assert!(!gw.link().is_open());
}

#[test]
fn test_open_twice_reports_already_open() {
    let mut gw = gateway();
    let _session = gw.open().unwrap();

    assert_eq!(gw.open(), Err(DeviceError::Link(LinkError::AlreadyOpen)));
}

#[test]
fn test_read_status_returns_board_housekeeping() {
    let mut gw = gateway();
    let session = gw.open().unwrap();

    let hk = gw.read_status(&session).unwrap();
    assert_eq!(hk.counter, 1);
    assert_eq!(hk.config, CFG_SOLAR_ENABLE);
    // Upper half of the status word carries battery millivolts
    assert_eq!(hk.status >> 16, u32::from(gw.link().battery().battery_voltage_mv));

    let again = gw.read_status(&session).unwrap();
    assert_eq!(again.counter, 2);
}

#[test]
fn test_read_data_reports_power_measurements() {
    let mut gw = gateway();
    let session = gw.open().unwrap();

    let data = gw.read_data(&session).unwrap();
    let battery = gw.link().battery();
    assert_eq!(data.counter, 1);
    assert_eq!(data.x, battery.battery_voltage_mv);
    assert_eq!(data.y, battery.solar_voltage_mv);
    assert_eq!(data.z, battery.load_current_ma);
    assert!(data.y > 0, "solar input is enabled by default");
}

#[test]
fn test_configure_changes_board_behaviour() {
    let mut gw = gateway();
    let session = gw.open().unwrap();

    gw.write_config(session.handle(), CFG_POWER_SAVE).unwrap();
    assert_eq!(gw.link().config_word(), CFG_POWER_SAVE);

    let data = gw.read_data(&session).unwrap();
    assert_eq!(data.y, 0, "solar disabled by the new config word");
    assert!(data.z < 500, "power save halves the load");

    let hk = gw.read_status(&session).unwrap();
    assert_eq!(hk.config, CFG_POWER_SAVE);
    assert_eq!(hk.status & STATUS_SOLAR_ACTIVE, 0);
}

#[test]
fn test_configure_without_open_port_fails() {
    let mut gw = gateway();
    let handle = gw.handle();

    assert_eq!(
        gw.write_config(handle, 0x1),
        Err(DeviceError::Link(LinkError::NotOpen))
    );
    assert_eq!(gw.link().frames_received(), 0);
}

#[test]
fn test_stale_session_is_refused() {
    let mut gw = gateway();
    let _session = gw.open().unwrap();
    let stale = Session::new(DeviceHandle(-1), "/dev/elsewhere");

    assert_eq!(
        gw.read_status(&stale),
        Err(DeviceError::StaleSession(DeviceHandle(-1)))
    );
    assert_eq!(gw.close(&stale), Err(DeviceError::StaleSession(DeviceHandle(-1))));
    assert!(gw.link().is_open());
}

#[test]
fn test_open_failure_injected() {
    let mut gw = gateway();
    gw.link_mut().inject_fault(DeviceFault::OpenFailure);

    assert!(matches!(gw.open(), Err(DeviceError::Link(LinkError::Io(_)))));
    assert!(!gw.link().is_open());

    gw.link_mut().clear_faults();
    assert!(gw.open().is_ok());
}

#[test]
fn test_close_failure_leaves_port_open() {
    let mut gw = gateway();
    let session = gw.open().unwrap();
    gw.link_mut().inject_fault(DeviceFault::CloseFailure);

    assert_eq!(gw.close(&session), Err(DeviceError::Link(LinkError::Busy)));
    assert!(gw.link().is_open());
}

#[test]
fn test_write_failure_is_a_nack() {
    let mut gw = gateway();
    let session = gw.open().unwrap();
    gw.link_mut().inject_fault(DeviceFault::WriteFailure);

    assert_eq!(gw.read_data(&session), Err(DeviceError::Link(LinkError::Nack)));
}

#[test]
fn test_corrupt_reply_rejected() {
    let mut gw = gateway();
    let session = gw.open().unwrap();
    gw.link_mut().inject_fault(DeviceFault::CorruptReply);

    assert!(matches!(
        gw.read_status(&session),
        Err(DeviceError::Frame(FrameError::BadHeader(_)))
    ));
    // A corrupted configure echo no longer matches the command
    assert_eq!(
        gw.write_config(session.handle(), 0x2),
        Err(DeviceError::EchoMismatch)
    );
}

#[test]
fn test_stalled_reply_times_out() {
    let mut gw = gateway();
    let session = gw.open().unwrap();
    gw.link_mut().inject_fault(DeviceFault::StalledReply);

    assert_eq!(
        gw.read_data(&session),
        Err(DeviceError::Timeout {
            expected: frame::DATA_REPLY_SIZE,
            received: 0,
        })
    );
}

#[test]
fn test_simulated_board_rejects_malformed_frames() {
    let mut board = SimulatedEps::new();
    board.open("/dev/test", 9600).unwrap();

    assert_eq!(board.write_all(&[0xDE, 0xAD, 0x01]), Err(LinkError::Nack));

    let mut bad = frame::encode_command(DeviceCommand::RequestHk, 0);
    bad[CMD_FRAME_SIZE - 1] = 0x00;
    assert_eq!(board.write_all(&bad), Err(LinkError::Nack));
    assert_eq!(board.frames_received(), 0);
    assert_eq!(board.read_byte(), Err(nb::Error::WouldBlock));
}

#[test]
fn test_hk_and_data_frames_decode_what_was_encoded() {
    let hk = HkFields {
        counter: 0x0102_0304,
        config: 0x3,
        status: 0x0E74_0002,
    };
    let encoded = frame::encode_hk(&hk);
    assert_eq!(&encoded[..2], &frame::FRAME_HEADER);
    assert_eq!(&encoded[encoded.len() - 2..], &frame::FRAME_TRAILER);
    assert_eq!(&encoded[2..6], &[0x01, 0x02, 0x03, 0x04]);
    assert_eq!(frame::decode_hk(&encoded), Ok(hk));

    let data = DataFields {
        counter: 9,
        x: 3700,
        y: 0,
        z: 250,
    };
    assert_eq!(frame::decode_data(&frame::encode_data(&data)), Ok(data));
}

#[test]
fn test_frame_decode_errors() {
    assert_eq!(
        frame::decode_hk(&[0u8; 4]),
        Err(FrameError::Length {
            expected: frame::HK_REPLY_SIZE,
            actual: 4,
        })
    );

    let mut frame_bytes = frame::encode_command(DeviceCommand::Configure, 7);
    assert_eq!(frame::decode_command(&frame_bytes), Ok((DeviceCommand::Configure, 7)));

    frame_bytes[2] = 0x7F;
    assert_eq!(frame::decode_command(&frame_bytes), Err(FrameError::UnknownCommand(0x7F)));

    frame_bytes[0] = 0x00;
    assert_eq!(
        frame::decode_command(&frame_bytes),
        Err(FrameError::BadHeader([0x00, 0xAD]))
    );
}

#[test]
fn test_command_frame_layout() {
    let bytes = frame::encode_command(DeviceCommand::Configure, 0x0000_0001);
    assert_eq!(bytes, [0xDE, 0xAD, 0x03, 0x00, 0x00, 0x00, 0x01, 0xBE, 0xEF]);
}

#[test]
fn test_switch_drives_board_outputs() {
    let mut gw = gateway();
    let session = gw.open().unwrap();

    gw.command_switch(session.handle(), 2, SWITCH_ON).unwrap();
    gw.command_switch(session.handle(), 5, SWITCH_ON).unwrap();
    assert!(gw.link().is_switch_on(2));
    assert_eq!(gw.link().switch_states(), 0b0010_0100);

    let hk = gw.read_status(&session).unwrap();
    assert_eq!((hk.status >> STATUS_SWITCH_SHIFT) & 0xFF, 0b0010_0100);

    // Each live output adds to the load the board reports
    let data = gw.read_data(&session).unwrap();
    assert_eq!(data.z, 500 + 2 * 60);

    gw.command_switch(session.handle(), 2, SWITCH_OFF).unwrap();
    assert!(!gw.link().is_switch_on(2));
    assert_eq!(gw.link().switch_states(), 0b0010_0000);
}

#[test]
fn test_invalid_switch_never_reaches_board() {
    let mut gw = gateway();
    let session = gw.open().unwrap();
    let frames_before = gw.link().frames_received();

    assert_eq!(
        gw.command_switch(session.handle(), 8, SWITCH_ON),
        Err(DeviceError::InvalidSwitch {
            switch: 8,
            state: SWITCH_ON,
        })
    );
    assert_eq!(
        gw.command_switch(session.handle(), 0, 0x55),
        Err(DeviceError::InvalidSwitch {
            switch: 0,
            state: 0x55,
        })
    );
    assert_eq!(gw.link().frames_received(), frames_before);

    // The board refuses a bad switch frame on its own as well
    let bad = frame::encode_command(DeviceCommand::Switch, frame::switch_payload(9, SWITCH_ON));
    assert_eq!(gw.link_mut().write_all(&bad), Err(LinkError::Nack));
    assert_eq!(gw.link().switch_states(), 0);
}

#[test]
fn test_switch_while_port_closed() {
    let mut gw = gateway();
    let handle = gw.handle();

    assert_eq!(
        gw.command_switch(handle, 0, SWITCH_ON),
        Err(DeviceError::Link(LinkError::NotOpen))
    );
    assert_eq!(gw.link().switch_states(), 0);
}

#[test]
fn test_switch_payload_layout() {
    let bytes = frame::encode_command(DeviceCommand::Switch, frame::switch_payload(3, SWITCH_ON));
    assert_eq!(bytes, [0xDE, 0xAD, 0x04, 0x00, 0x00, 0x03, 0xAA, 0xBE, 0xEF]);
    assert_eq!(frame::split_switch_payload(0x0000_03AA), (3, SWITCH_ON));
}

/// Board link that can hold back all or part of a reply until the test
/// lets it arrive, as when the board answers after the gateway gave up.
#[derive(Debug, Default)]
struct LateReplyLink {
    counter: u32,
    deliver_now: Option<usize>,
    held: Vec<u8>,
    rx: VecDeque<u8>,
}

impl LateReplyLink {
    fn hold_next_reply(&mut self) {
        self.deliver_now = Some(0);
    }

    fn split_next_reply(&mut self, delivered: usize) {
        self.deliver_now = Some(delivered);
    }

    /// Lets the held-back bytes land in the receive buffer.
    fn release(&mut self) {
        let held = std::mem::take(&mut self.held);
        self.rx.extend(held);
    }
}

impl DeviceLink for LateReplyLink {
    fn open(&mut self, _port: &str, _baud_rate: u32) -> Result<(), LinkError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let (command, payload) = frame::decode_command(bytes).map_err(|_| LinkError::Nack)?;
        self.counter += 1;
        let reply = match command {
            DeviceCommand::RequestHk => frame::encode_hk(&HkFields {
                counter: self.counter,
                config: 0,
                status: 0,
            })
            .to_vec(),
            DeviceCommand::RequestData => frame::encode_data(&DataFields {
                counter: self.counter,
                x: 3700,
                y: 0,
                z: 500,
            })
            .to_vec(),
            _ => frame::encode_command(command, payload).to_vec(),
        };
        match self.deliver_now.take() {
            Some(delivered) => {
                let split = delivered.min(reply.len());
                self.rx.extend(&reply[..split]);
                self.held = reply[split..].to_vec();
            }
            None => self.rx.extend(reply),
        }
        Ok(())
    }

    fn read_byte(&mut self) -> nb::Result<u8, LinkError> {
        self.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

fn late_gateway() -> SerialGateway<LateReplyLink> {
    let config = DeviceConfig {
        read_poll_budget: 4,
        ..DeviceConfig::default()
    };
    SerialGateway::new(LateReplyLink::default(), config)
}

#[test]
fn test_late_reply_is_dropped_before_next_command() {
    let mut gw = late_gateway();
    let session = gw.open().unwrap();

    gw.link_mut().hold_next_reply();
    assert_eq!(
        gw.read_status(&session),
        Err(DeviceError::Timeout {
            expected: frame::HK_REPLY_SIZE,
            received: 0,
        })
    );

    // The housekeeping reply turns up after the gateway stopped waiting
    gw.link_mut().release();

    for expected in 2..6 {
        assert_eq!(gw.read_data(&session).unwrap().counter, expected);
    }
    assert_eq!(gw.read_status(&session).unwrap().counter, 6);
    gw.write_config(session.handle(), 0x1).unwrap();
    assert!(gw.link().rx.is_empty());
}

#[test]
fn test_partial_reply_tail_is_dropped() {
    let mut gw = late_gateway();
    let session = gw.open().unwrap();

    gw.link_mut().split_next_reply(5);
    assert_eq!(
        gw.read_data(&session),
        Err(DeviceError::Timeout {
            expected: frame::DATA_REPLY_SIZE,
            received: 5,
        })
    );

    gw.link_mut().release();
    assert_eq!(gw.read_status(&session).unwrap().counter, 2);
    assert_eq!(gw.read_data(&session).unwrap().counter, 3);
}

#[test]
fn test_discard_input_drains_waiting_bytes() {
    let mut link = LateReplyLink::default();
    link.write_all(&frame::encode_command(DeviceCommand::RequestHk, 0)).unwrap();

    assert_eq!(link.discard_input(), Ok(frame::HK_REPLY_SIZE));
    assert_eq!(link.discard_input(), Ok(0));
    assert_eq!(link.read_byte(), Err(nb::Error::WouldBlock));
}
