#![allow(dead_code)]

use eps_app::bus::LocalBus;
use eps_app::config::{AppConfig, MessageIds};
use eps_app::device::{
    DataFields, DeviceError, DeviceGateway, DeviceHandle, HkFields, LinkError, Session,
};
use eps_app::events::EventLog;
use eps_app::protocol::Message;
use eps_app::EpsApp;

pub const SESSION_HANDLE: DeviceHandle = DeviceHandle(7);

pub type TestApp = EpsApp<ScriptedGateway, LocalBus, EventLog>;

/// Gateway whose every outcome is chosen by the test.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    pub fail_open: bool,
    pub fail_close: bool,
    pub fail_status: bool,
    pub fail_data: bool,
    pub fail_config: bool,
    pub fail_switch: bool,
    pub hk: HkFields,
    pub data: DataFields,
    pub calls: Vec<&'static str>,
    pub configs: Vec<(DeviceHandle, u32)>,
    pub switches: Vec<(DeviceHandle, u8, u8)>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            hk: HkFields {
                counter: 5,
                config: 0x1,
                status: 0xABCD,
            },
            data: DataFields {
                counter: 6,
                x: 3700,
                y: 4100,
                z: 500,
            },
            ..Self::default()
        }
    }

    fn outcome(&self, fail: bool) -> Result<(), DeviceError> {
        if fail {
            Err(DeviceError::Link(LinkError::Busy))
        } else {
            Ok(())
        }
    }
}

impl DeviceGateway for ScriptedGateway {
    fn open(&mut self) -> Result<Session, DeviceError> {
        self.calls.push("open");
        self.outcome(self.fail_open)?;
        Ok(Session::new(SESSION_HANDLE, "/dev/scripted"))
    }

    fn close(&mut self, _session: &Session) -> Result<(), DeviceError> {
        self.calls.push("close");
        self.outcome(self.fail_close)
    }

    fn read_status(&mut self, _session: &Session) -> Result<HkFields, DeviceError> {
        self.calls.push("read_status");
        self.outcome(self.fail_status)?;
        Ok(self.hk)
    }

    fn read_data(&mut self, _session: &Session) -> Result<DataFields, DeviceError> {
        self.calls.push("read_data");
        self.outcome(self.fail_data)?;
        Ok(self.data)
    }

    fn write_config(&mut self, handle: DeviceHandle, payload: u32) -> Result<(), DeviceError> {
        self.calls.push("write_config");
        self.configs.push((handle, payload));
        self.outcome(self.fail_config)
    }

    fn command_switch(
        &mut self,
        handle: DeviceHandle,
        switch: u8,
        state: u8,
    ) -> Result<(), DeviceError> {
        self.calls.push("command_switch");
        self.switches.push((handle, switch, state));
        self.outcome(self.fail_switch)
    }
}

pub fn ids() -> MessageIds {
    MessageIds::default()
}

pub fn initialized_app(gateway: ScriptedGateway) -> TestApp {
    let mut app = EpsApp::new(AppConfig::default(), gateway, LocalBus::new(), EventLog::new());
    app.init().expect("init should succeed on a fresh local bus");
    app
}

pub fn ground(code: u16) -> Message {
    Message::new(ids().cmd, code)
}

pub fn configure(word: u32) -> Message {
    Message::with_payload(ids().cmd, 4, word.to_be_bytes())
}

pub fn switch(number: u8, state: u8) -> Message {
    Message::with_payload(ids().cmd, SWITCH, [number, state])
}

pub fn request(code: u16) -> Message {
    Message::new(ids().req_hk, code)
}

pub const NOOP: u16 = 0;
pub const RESET: u16 = 1;
pub const ENABLE: u16 = 2;
pub const DISABLE: u16 = 3;
pub const SWITCH: u16 = 5;
pub const REQ_HK: u16 = 0;
pub const REQ_DATA: u16 = 1;
