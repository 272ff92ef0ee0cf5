mod common;

use common::*;
use eps_app::bus::{BusError, ChannelBus, LocalBus, SoftwareBus};
use eps_app::config::{AppConfig, DeviceConfig};
use eps_app::device::sim::STATUS_SWITCH_SHIFT;
use eps_app::device::{DeviceFault, SerialGateway, SimulatedEps, SWITCH_ON};
use eps_app::error::AppError;
use eps_app::events::{EventId, EventLog};
use eps_app::executive::{Executive, ProcessExecutive, RunStatus};
use eps_app::protocol::{DeviceState, Message};
use eps_app::EpsApp;
use std::time::Duration;
use tokio::sync::broadcast;

fn simulated_app() -> EpsApp<SerialGateway<SimulatedEps>, LocalBus, EventLog> {
    let config = AppConfig {
        device: DeviceConfig {
            read_poll_budget: 4,
            ..DeviceConfig::default()
        },
        ..AppConfig::default()
    };
    let gateway = SerialGateway::new(SimulatedEps::new(), config.device.clone());
    EpsApp::new(config, gateway, LocalBus::new(), EventLog::new())
}

#[test]
fn test_init_subscribes_and_announces_startup() {
    let mut app = initialized_app(ScriptedGateway::new());

    assert!(app.is_initialized());
    assert!(app.bus().is_subscribed(ids().cmd));
    assert!(app.bus().is_subscribed(ids().req_hk));
    assert!(!app.bus().is_subscribed(ids().hk_tlm));
    assert_eq!(app.get_state().run_status, RunStatus::Running);

    let startup = app.events().last().unwrap();
    assert_eq!(startup.id, EventId::StartupInf);
    assert!(startup.text.contains(&AppConfig::version_string()));

    // A second init cannot create another pipe
    assert!(matches!(app.init(), Err(AppError::CreatePipe(BusError::PipeExists))));
    assert_eq!(app.get_state().run_status, RunStatus::Error);
    assert!(app.events().contains(EventId::PipeErr));
}

#[test]
fn test_init_failure_prevents_the_loop() {
    let config = AppConfig {
        pipe_depth: 0,
        ..AppConfig::default()
    };
    let mut app = EpsApp::new(config, ScriptedGateway::new(), LocalBus::new(), EventLog::new());
    let mut executive = ProcessExecutive::with_max_cycles(10);

    let status = app.run(&mut executive);

    assert_eq!(status, RunStatus::Error);
    assert_eq!(executive.cycles(), 0);
    assert!(executive.fatal_reported());
    assert!(app.events().contains(EventId::PipeErr));
    assert!(!app.events().contains(EventId::StartupInf));
}

#[test]
fn test_run_once_before_init() {
    let mut app = EpsApp::new(
        AppConfig::default(),
        ScriptedGateway::new(),
        LocalBus::new(),
        EventLog::new(),
    );
    assert!(matches!(app.run_once(), Err(AppError::NotInitialized)));
}

#[test]
fn test_messages_processed_in_arrival_order() {
    let mut app = initialized_app(ScriptedGateway::new());
    for message in [ground(ENABLE), request(REQ_HK), ground(DISABLE), request(REQ_HK)] {
        app.bus_mut().send(message).unwrap();
    }

    let mut executive = ProcessExecutive::with_max_cycles(4);
    let status = app.run(&mut executive);

    assert_eq!(status, RunStatus::Running);
    assert_eq!(executive.cycles(), 4);
    assert!(!executive.fatal_reported());

    let published = app.bus().published();
    assert_eq!(published.len(), 2);
    let first = published[0].housekeeping().unwrap();
    let second = published[1].housekeeping().unwrap();
    assert_eq!(first.device_enabled, DeviceState::Enabled);
    assert_eq!(second.device_enabled, DeviceState::Disabled);
    assert!(published[1].header.sequence > published[0].header.sequence);
    assert!(published[1].header.timestamp_ms >= published[0].header.timestamp_ms);
    assert_eq!(app.get_performance_stats().messages_processed, 4);
}

#[test]
fn test_receive_failure_is_fatal() {
    let mut app = initialized_app(ScriptedGateway::new());
    app.bus_mut().send(ground(NOOP)).unwrap();

    // One message, then the empty local pipe reports the bus closed
    let mut executive = ProcessExecutive::with_max_cycles(100);
    let status = app.run(&mut executive);

    assert_eq!(status, RunStatus::Error);
    assert_eq!(executive.cycles(), 2);
    assert!(executive.fatal_reported());
    assert_eq!(app.events().count_of(EventId::PipeErr), 1);
    assert_eq!(app.get_state().counters.command_count, 1);
}

#[test]
fn test_shutdown_disables_enabled_device() {
    let mut app = initialized_app(ScriptedGateway::new());
    app.bus_mut().send(ground(ENABLE)).unwrap();

    let mut executive = ProcessExecutive::with_max_cycles(1);
    app.run(&mut executive);

    let state = app.get_state();
    assert_eq!(state.device_enabled(), DeviceState::Disabled);
    assert_eq!(state.counters.device_count, 2);
    assert_eq!(app.gateway().calls, vec!["open", "close"]);
    assert!(app.events().contains(EventId::DisableInf));
}

#[test]
fn test_shutdown_close_failure_is_not_retried() {
    let mut gateway = ScriptedGateway::new();
    gateway.fail_close = true;
    let mut app = initialized_app(gateway);
    app.process_message(&ground(ENABLE)).unwrap();

    app.shutdown();

    assert_eq!(app.gateway().calls, vec!["open", "close"]);
    assert_eq!(app.get_state().device_enabled(), DeviceState::Enabled);
    assert_eq!(app.get_state().counters.device_error_count, 1);
    assert!(app.events().contains(EventId::UartCloseErr));
}

#[test]
fn test_shutdown_while_disabled_touches_nothing() {
    let mut app = initialized_app(ScriptedGateway::new());
    let events_before = app.events().total_emitted();

    app.shutdown();

    assert!(app.gateway().calls.is_empty());
    assert_eq!(app.events().total_emitted(), events_before);
    assert_eq!(app.get_state().counters.device_error_count, 0);
}

#[test]
fn test_shutdown_flag_stops_loop() {
    let mut app = initialized_app(ScriptedGateway::new());
    let mut executive = ProcessExecutive::new();
    executive.request_shutdown();

    assert_eq!(app.run(&mut executive), RunStatus::Running);
    assert_eq!(executive.cycles(), 0);
    assert!(!executive.should_run(RunStatus::Running));
}

#[test]
fn test_unsubscribed_messages_never_reach_dispatch() {
    let mut app = initialized_app(ScriptedGateway::new());

    app.bus_mut().send(Message::new(0x0777, 0)).unwrap();
    assert_eq!(app.bus().pending(), 0);
    assert_eq!(app.bus().dropped(), 1);

    // A misrouted packet that does reach the pipe is counted as an error
    app.bus_mut().inject(Message::new(0x0777, 0)).unwrap();
    assert_eq!(app.run_once().unwrap(), None);
    assert_eq!(app.get_state().counters.command_error_count, 1);
    assert!(app.events().contains(EventId::ProcessCmdErr));
}

#[test]
fn test_full_cycle_against_simulated_board() {
    let mut app = simulated_app();
    app.init().unwrap();
    let cmd = app.config().message_ids.cmd;
    let req = app.config().message_ids.req_hk;

    for message in [
        Message::new(cmd, 2),
        Message::with_payload(cmd, 4, 0x3u32.to_be_bytes()),
        Message::new(req, 0),
        Message::new(req, 1),
        Message::new(cmd, 3),
    ] {
        app.bus_mut().send(message).unwrap();
    }
    for _ in 0..5 {
        app.run_once().unwrap();
    }

    assert!(!app.gateway().link().is_open());
    assert_eq!(app.gateway().link().config_word(), 0x3);

    let published = app.bus().published();
    assert_eq!(published.len(), 2);
    let hk = published[0].housekeeping().unwrap();
    assert_eq!(hk.device_hk.config, 0x3);
    assert_eq!(hk.command_count, 3);
    assert_eq!(hk.device_count, 3);
    let data = published[1].device_data().unwrap();
    assert_eq!(data.counter, 3);

    let counters = app.get_state().counters;
    assert_eq!(counters.command_count, 5);
    assert_eq!(counters.device_count, 5);
    assert_eq!(counters.device_error_count, 0);
    assert_eq!(app.get_telemetry_metrics().housekeeping_published, 1);
    assert_eq!(app.get_telemetry_metrics().device_data_published, 1);
}

#[test]
fn test_switch_state_reaches_housekeeping() {
    let mut app = simulated_app();
    app.init().unwrap();

    app.process_message(&ground(ENABLE)).unwrap();
    app.process_message(&switch(4, SWITCH_ON)).unwrap();
    app.process_message(&request(REQ_HK)).unwrap();

    assert!(app.gateway().link().is_switch_on(4));
    let hk = app.bus().published()[0].housekeeping().unwrap();
    assert_eq!((hk.device_hk.status >> STATUS_SWITCH_SHIFT) & 0xFF, 1 << 4);
    assert!(app.events().contains(EventId::SwitchInf));
    assert_eq!(app.get_state().counters.device_count, 3);
}

#[test]
fn test_board_faults_surface_as_device_errors() {
    let mut app = simulated_app();
    app.init().unwrap();

    app.gateway_mut().link_mut().inject_fault(DeviceFault::OpenFailure);
    let _ = app.process_message(&ground(ENABLE));
    assert_eq!(app.get_state().device_enabled(), DeviceState::Disabled);
    assert!(app.events().contains(EventId::UartInitErr));

    app.gateway_mut().link_mut().clear_faults();
    app.process_message(&ground(ENABLE)).unwrap();

    app.gateway_mut().link_mut().inject_fault(DeviceFault::StalledReply);
    app.process_message(&request(REQ_HK)).unwrap_err();
    assert!(app.events().last().unwrap().text.contains("timed out"));

    // Housekeeping still went out even though the read failed
    assert_eq!(app.bus().published().len(), 1);
    assert_eq!(app.get_state().counters.device_error_count, 2);

    // Configure while disabled reaches a closed port
    app.gateway_mut().link_mut().clear_faults();
    app.process_message(&ground(DISABLE)).unwrap();
    let _ = app.process_message(&configure(0x1));
    assert_eq!(app.get_state().counters.device_error_count, 3);
}

#[test]
fn test_channel_bus_timeout_is_not_fatal() {
    let (telemetry_tx, mut telemetry_rx) = broadcast::channel(8);
    let (bus, sender) = ChannelBus::new(4, Some(Duration::from_millis(5)), telemetry_tx);
    let mut app = EpsApp::new(AppConfig::default(), ScriptedGateway::new(), bus, EventLog::new());
    app.init().unwrap();

    assert_eq!(app.run_once().unwrap(), None);
    assert_eq!(app.get_performance_stats().receive_timeouts, 1);
    assert_eq!(app.get_state().run_status, RunStatus::Running);

    sender.send(request(REQ_HK)).unwrap();
    app.run_once().unwrap();
    let packet = telemetry_rx.try_recv().unwrap();
    assert_eq!(packet.header.msg_id, ids().hk_tlm);

    // Dropping every sender closes the bus, which ends the application
    drop(sender);
    assert!(matches!(app.run_once(), Err(AppError::Receive(BusError::Closed))));
    assert_eq!(app.get_state().run_status, RunStatus::Error);
}

#[test]
fn test_channel_bus_discards_unsubscribed_and_respects_depth() {
    let (telemetry_tx, _telemetry_rx) = broadcast::channel(8);
    let (mut bus, sender) = ChannelBus::new(2, Some(Duration::from_millis(5)), telemetry_tx);
    let pipe = bus.create_pipe(2, "TEST_PIPE").unwrap();
    bus.subscribe(ids().cmd, pipe).unwrap();

    sender.send(Message::new(0x0100, 0)).unwrap();
    sender.send(ground(NOOP)).unwrap();
    assert_eq!(sender.send(ground(NOOP)), Err(BusError::PipeOverflow(ids().cmd)));

    assert_eq!(bus.receive(pipe).unwrap(), ground(NOOP));
    assert_eq!(bus.receive(pipe), Err(BusError::Timeout));
}

#[test]
fn test_publish_without_listeners_is_not_a_failure() {
    let (telemetry_tx, telemetry_rx) = broadcast::channel(8);
    drop(telemetry_rx);
    let (bus, sender) = ChannelBus::new(4, Some(Duration::from_millis(5)), telemetry_tx);
    let mut app = EpsApp::new(AppConfig::default(), ScriptedGateway::new(), bus, EventLog::new());
    app.init().unwrap();

    sender.send(request(REQ_HK)).unwrap();
    app.run_once().unwrap();

    let metrics = app.get_telemetry_metrics();
    assert_eq!(metrics.housekeeping_published, 1);
    assert_eq!(metrics.publish_failures, 0);
}
