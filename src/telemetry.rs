use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

use crate::bus::SoftwareBus;
use crate::config::MessageIds;
use crate::device::DataFields;
use crate::protocol::{
    DeviceDataRecord, HousekeepingRecord, OutboundPacket, PacketHeader, TelemetryBody,
};
use crate::state::ApplicationState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryMetrics {
    pub housekeeping_published: u32,
    pub device_data_published: u32,
    pub publish_failures: u32,
    pub last_sequence: u32,
}

/// Composes outbound telemetry from application state and hands it to the
/// bus with a monotonic timestamp. Publication is fire-and-forget.
#[derive(Debug)]
pub struct TelemetryAggregator {
    ids: MessageIds,
    start_time: Instant,
    last_timestamp_ms: u64,
    sequence: u32,
    metrics: TelemetryMetrics,
}

impl TelemetryAggregator {
    pub fn new(ids: MessageIds) -> Self {
        Self {
            ids,
            start_time: Instant::now(),
            last_timestamp_ms: 0,
            sequence: 0,
            metrics: TelemetryMetrics::default(),
        }
    }

    pub fn build_housekeeping(&self, state: &ApplicationState) -> HousekeepingRecord {
        let counters = &state.counters;
        HousekeepingRecord {
            command_error_count: counters.command_error_count,
            command_count: counters.command_count,
            device_error_count: counters.device_error_count,
            device_count: counters.device_count,
            device_enabled: state.device_enabled(),
            device_hk: state.housekeeping_snapshot,
        }
    }

    pub fn build_device_data(&self, data: DataFields) -> DeviceDataRecord {
        DeviceDataRecord::from(data)
    }

    pub fn publish_housekeeping<B: SoftwareBus>(
        &mut self,
        state: &ApplicationState,
        bus: &mut B,
    ) -> OutboundPacket {
        let record = self.build_housekeeping(state);
        let packet = self.stamp(self.ids.hk_tlm, TelemetryBody::Housekeeping(record));
        if self.send(bus, &packet) {
            self.metrics.housekeeping_published =
                self.metrics.housekeeping_published.wrapping_add(1);
        }
        packet
    }

    pub fn publish_device_data<B: SoftwareBus>(
        &mut self,
        data: DataFields,
        bus: &mut B,
    ) -> OutboundPacket {
        let record = self.build_device_data(data);
        let packet = self.stamp(self.ids.device_tlm, TelemetryBody::DeviceData(record));
        if self.send(bus, &packet) {
            self.metrics.device_data_published =
                self.metrics.device_data_published.wrapping_add(1);
        }
        packet
    }

    pub fn get_metrics(&self) -> TelemetryMetrics {
        self.metrics
    }

    fn stamp(&mut self, msg_id: u16, body: TelemetryBody) -> OutboundPacket {
        let elapsed_ms = u64::try_from(self.start_time.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_timestamp_ms = self.last_timestamp_ms.max(elapsed_ms);
        self.sequence = self.sequence.wrapping_add(1);
        self.metrics.last_sequence = self.sequence;

        OutboundPacket {
            header: PacketHeader {
                msg_id,
                timestamp_ms: self.last_timestamp_ms,
                sequence: self.sequence,
            },
            body,
        }
    }

    fn send<B: SoftwareBus>(&mut self, bus: &mut B, packet: &OutboundPacket) -> bool {
        match bus.publish(packet) {
            Ok(()) => {
                debug!(
                    msg_id = packet.header.msg_id,
                    sequence = packet.header.sequence,
                    "telemetry published"
                );
                true
            }
            Err(e) => {
                self.metrics.publish_failures = self.metrics.publish_failures.wrapping_add(1);
                warn!(msg_id = packet.header.msg_id, "telemetry publish failed: {}", e);
                false
            }
        }
    }
}
