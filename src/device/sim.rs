use heapless::Deque;
use serde::{Deserialize, Serialize};

use super::frame::{self, DeviceCommand, CMD_FRAME_SIZE};
use super::serial::{DeviceLink, LinkError};
use super::{DataFields, HkFields, SWITCH_COUNT, SWITCH_OFF, SWITCH_ON};

const NOMINAL_VOLTAGE_MV: u16 = 3700;
const CRITICAL_VOLTAGE_MV: u16 = 3200;
const MAX_VOLTAGE_MV: u16 = 4200;
const NOMINAL_LOAD_MA: u16 = 500;
const SOLAR_CURRENT_MA: u16 = 800;
const INTERNAL_RESISTANCE_MOHM: i32 = 100;
const SWITCH_LOAD_MA: u16 = 60;

/// Config word bits understood by the board.
pub const CFG_SOLAR_ENABLE: u32 = 1 << 0;
pub const CFG_POWER_SAVE: u32 = 1 << 1;

/// Status word flag bits; the upper half carries battery millivolts.
pub const STATUS_CHARGING: u32 = 1 << 0;
pub const STATUS_SOLAR_ACTIVE: u32 = 1 << 1;
pub const STATUS_BATTERY_LOW: u32 = 1 << 2;
/// Bits 8..16 of the status word mirror the load switch outputs.
pub const STATUS_SWITCH_SHIFT: u32 = 8;

const REPLY_QUEUE_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceFault {
    OpenFailure,
    CloseFailure,
    WriteFailure,
    CorruptReply,
    StalledReply,
}

#[derive(Debug, Clone, Copy, Default)]
struct FaultPlan {
    open_failure: bool,
    close_failure: bool,
    write_failure: bool,
    corrupt_reply: bool,
    stalled_reply: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatteryState {
    pub battery_voltage_mv: u16,
    pub battery_current_ma: i16,
    pub solar_voltage_mv: u16,
    pub solar_current_ma: u16,
    pub load_current_ma: u16,
}

/// Simulated power board answering the framed protocol over an in-memory link.
#[derive(Debug)]
pub struct SimulatedEps {
    open: bool,
    port: Option<String>,
    replies: Deque<u8, REPLY_QUEUE_SIZE>,
    faults: FaultPlan,

    counter: u32,
    config: u32,
    switches: u8,
    battery: BatteryState,
    ticks: u32,
    frames_received: u32,
}

impl Default for SimulatedEps {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEps {
    pub fn new() -> Self {
        Self {
            open: false,
            port: None,
            replies: Deque::new(),
            faults: FaultPlan::default(),
            counter: 0,
            config: CFG_SOLAR_ENABLE,
            switches: 0,
            battery: BatteryState {
                battery_voltage_mv: NOMINAL_VOLTAGE_MV,
                battery_current_ma: -(NOMINAL_LOAD_MA as i16),
                solar_voltage_mv: 0,
                solar_current_ma: 0,
                load_current_ma: NOMINAL_LOAD_MA,
            },
            ticks: 0,
            frames_received: 0,
        }
    }

    pub fn inject_fault(&mut self, fault: DeviceFault) {
        match fault {
            DeviceFault::OpenFailure => self.faults.open_failure = true,
            DeviceFault::CloseFailure => self.faults.close_failure = true,
            DeviceFault::WriteFailure => self.faults.write_failure = true,
            DeviceFault::CorruptReply => self.faults.corrupt_reply = true,
            DeviceFault::StalledReply => self.faults.stalled_reply = true,
        }
    }

    pub fn clear_faults(&mut self) {
        self.faults = FaultPlan::default();
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    pub fn config_word(&self) -> u32 {
        self.config
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn frames_received(&self) -> u32 {
        self.frames_received
    }

    /// Output states as a bitmask, bit `n` for switch `n`.
    pub fn switch_states(&self) -> u8 {
        self.switches
    }

    pub fn is_switch_on(&self, switch: u8) -> bool {
        switch < SWITCH_COUNT && self.switches & (1 << switch) != 0
    }

    pub fn battery(&self) -> BatteryState {
        self.battery
    }

    fn status_word(&self) -> u32 {
        let mut flags = 0;
        if self.battery.battery_current_ma > 0 {
            flags |= STATUS_CHARGING;
        }
        if self.battery.solar_current_ma > 0 {
            flags |= STATUS_SOLAR_ACTIVE;
        }
        if self.battery.battery_voltage_mv <= CRITICAL_VOLTAGE_MV {
            flags |= STATUS_BATTERY_LOW;
        }
        (u32::from(self.battery.battery_voltage_mv) << 16)
            | (u32::from(self.switches) << STATUS_SWITCH_SHIFT)
            | flags
    }

    fn step_battery(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);

        if self.config & CFG_SOLAR_ENABLE != 0 {
            let phase = self.ticks as f32 * 0.1;
            let efficiency = 0.7 + 0.3 * phase.sin().abs();
            self.battery.solar_voltage_mv = (f32::from(MAX_VOLTAGE_MV) * efficiency) as u16;
            self.battery.solar_current_ma = (f32::from(SOLAR_CURRENT_MA) * efficiency) as u16;
        } else {
            self.battery.solar_voltage_mv = 0;
            self.battery.solar_current_ma = 0;
        }

        let base_load = if self.config & CFG_POWER_SAVE != 0 {
            NOMINAL_LOAD_MA / 2
        } else {
            NOMINAL_LOAD_MA
        };
        let switched = SWITCH_LOAD_MA * self.switches.count_ones() as u16;
        self.battery.load_current_ma = base_load + switched;

        let net_current =
            i32::from(self.battery.solar_current_ma) - i32::from(self.battery.load_current_ma);
        self.battery.battery_current_ma = net_current as i16;

        let target = i32::from(NOMINAL_VOLTAGE_MV) + net_current * INTERNAL_RESISTANCE_MOHM / 1000;
        let current = i32::from(self.battery.battery_voltage_mv);
        let next = current + (target - current) / 10;
        self.battery.battery_voltage_mv =
            next.clamp(i32::from(CRITICAL_VOLTAGE_MV), i32::from(MAX_VOLTAGE_MV)) as u16;
    }

    fn queue_reply(&mut self, bytes: &[u8]) {
        if self.faults.stalled_reply {
            return;
        }
        for (i, &byte) in bytes.iter().enumerate() {
            let byte = if i == 0 && self.faults.corrupt_reply { !byte } else { byte };
            if self.replies.push_back(byte).is_err() {
                break;
            }
        }
    }

    fn handle_frame(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let (command, payload) = frame::decode_command(bytes).map_err(|_| LinkError::Nack)?;
        self.frames_received = self.frames_received.wrapping_add(1);
        self.counter = self.counter.wrapping_add(1);

        match command {
            DeviceCommand::Noop => {
                let echo = frame::encode_command(command, payload);
                self.queue_reply(&echo);
            }
            DeviceCommand::RequestHk => {
                let hk = HkFields {
                    counter: self.counter,
                    config: self.config,
                    status: self.status_word(),
                };
                self.queue_reply(&frame::encode_hk(&hk));
            }
            DeviceCommand::RequestData => {
                self.step_battery();
                let data = DataFields {
                    counter: self.counter,
                    x: self.battery.battery_voltage_mv,
                    y: self.battery.solar_voltage_mv,
                    z: self.battery.load_current_ma,
                };
                self.queue_reply(&frame::encode_data(&data));
            }
            DeviceCommand::Configure => {
                self.config = payload;
                let echo = frame::encode_command(command, payload);
                self.queue_reply(&echo);
            }
            DeviceCommand::Switch => {
                let (switch, state) = frame::split_switch_payload(payload);
                if switch >= SWITCH_COUNT {
                    return Err(LinkError::Nack);
                }
                match state {
                    SWITCH_ON => self.switches |= 1 << switch,
                    SWITCH_OFF => self.switches &= !(1 << switch),
                    _ => return Err(LinkError::Nack),
                }
                let echo = frame::encode_command(command, payload);
                self.queue_reply(&echo);
            }
        }
        Ok(())
    }
}

impl DeviceLink for SimulatedEps {
    fn open(&mut self, port: &str, _baud_rate: u32) -> Result<(), LinkError> {
        if self.faults.open_failure {
            return Err(LinkError::Io(format!("cannot open {port}")));
        }
        if self.open {
            return Err(LinkError::AlreadyOpen);
        }
        self.open = true;
        self.port = Some(port.to_string());
        self.replies.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), LinkError> {
        if !self.open {
            return Err(LinkError::NotOpen);
        }
        if self.faults.close_failure {
            return Err(LinkError::Busy);
        }
        self.open = false;
        self.port = None;
        self.replies.clear();
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if !self.open {
            return Err(LinkError::NotOpen);
        }
        if self.faults.write_failure {
            return Err(LinkError::Nack);
        }
        if bytes.len() != CMD_FRAME_SIZE {
            return Err(LinkError::Nack);
        }
        self.handle_frame(bytes)
    }

    fn read_byte(&mut self) -> nb::Result<u8, LinkError> {
        if !self.open {
            return Err(nb::Error::Other(LinkError::NotOpen));
        }
        self.replies.pop_front().ok_or(nb::Error::WouldBlock)
    }
}
