mod support;

use core::time::Duration;
use std::rc::Rc;

use losstest_core::codec::{DeviceInfo, Phase};
use losstest_core::config::{ChannelSet, NeverAbort, StartParams, TestConfig};
use losstest_core::engine::{StartError, StepResult};
use losstest_core::phy::Channel;
use losstest_core::radio::{RadioError, TargetId};
use losstest_core::telemetry::TelemetryEvent;
use losstest_core::trigger::{Mode, TaskStatus, TriggerRequest};

use support::{AbortAt, Fixture, LOCAL_ADDRESS, sender_report};

fn one_m_only() -> TestConfig {
    TestConfig {
        channels: ChannelSet::only(Channel::Le1M),
        ..TestConfig::default()
    }
}

#[test]
fn one_m_sender_finishes_after_two_bursts() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    fixture
        .engine
        .start(Mode::Sender, one_m_only(), NeverAbort)
        .expect("sender should start");
    assert_eq!(fixture.engine.task_status(Mode::Sender), TaskStatus::Running);

    let finished = fixture.run_to_end(16);

    assert_eq!(finished, (Mode::Sender, StepResult::Done));
    assert_eq!(fixture.count(TelemetryEvent::BurstStarted), 2);
    assert_eq!(fixture.count(TelemetryEvent::ReportSent(Channel::Le1M)), 2);
    assert_eq!(fixture.count(TelemetryEvent::ReportSent(Channel::Le2M)), 0);
    let complete = fixture.lines_for(TelemetryEvent::ChannelComplete(Channel::Le1M));
    assert_eq!(complete.len(), 1, "channel completes once");
    assert!(complete[0].starts_with("SND:7 "), "unexpected line {complete:?}");

    assert_eq!(fixture.engine.sender_progress(Channel::Le1M), (500, 500));
    let form = fixture.engine.form(Channel::Le1M);
    assert_eq!(form.pre_count, Phase::COMPLETE_TAG);
    assert_eq!(form.flow_count, 2);
    assert_eq!(fixture.engine.task_status(Mode::Sender), TaskStatus::Idle);
    assert_eq!(fixture.engine.active_mode(), None);

    let target = TargetId::channel(Channel::Le1M);
    let radio = fixture.engine.radio();
    assert_eq!(
        radio
            .starts_on(target)
            .filter(|start| **start == StartParams::BURST)
            .count(),
        2
    );
    assert!(
        radio
            .starts_on(target)
            .any(|start| *start == StartParams::timed(Duration::from_secs(3))),
        "finalize broadcast should be bounded"
    );
    assert!(
        radio
            .starts_on(TargetId::channel(Channel::CodedS8))
            .next()
            .is_none(),
        "disabled channels never start"
    );
}

#[test]
fn one_m_and_coded_sender_completes_both_channels() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    let mut channels = ChannelSet::only(Channel::Le1M);
    channels.set(Channel::CodedS8, true);
    let config = TestConfig {
        channels,
        ..TestConfig::default()
    };
    fixture
        .engine
        .start(Mode::Sender, config, NeverAbort)
        .expect("sender should start");

    assert_eq!(fixture.run_to_end(32), (Mode::Sender, StepResult::Done));

    let reports: Vec<_> = fixture
        .events()
        .into_iter()
        .filter(|event| matches!(event, TelemetryEvent::ReportSent(_)))
        .collect();
    assert_eq!(
        reports,
        [
            TelemetryEvent::ReportSent(Channel::Le1M),
            TelemetryEvent::ReportSent(Channel::CodedS8),
            TelemetryEvent::ReportSent(Channel::Le1M),
            TelemetryEvent::ReportSent(Channel::CodedS8),
        ],
        "the primary group and the coded channel take turns"
    );
    let bursts = fixture.lines_for(TelemetryEvent::BurstStarted);
    assert_eq!(bursts.len(), 4);
    for (line, flow) in bursts.iter().zip([1, 1, 2, 2]) {
        assert!(line.starts_with(&format!("Burst {flow} ")), "unexpected line {line}");
    }

    for channel in [Channel::Le1M, Channel::CodedS8] {
        assert_eq!(fixture.engine.sender_progress(channel), (500, 500));
        assert_eq!(fixture.count(TelemetryEvent::ChannelComplete(channel)), 1);
        assert_eq!(
            fixture
                .engine
                .radio()
                .starts_on(TargetId::channel(channel))
                .filter(|start| **start == StartParams::BURST)
                .count(),
            2,
            "{channel} bursts twice"
        );
        assert_eq!(fixture.engine.form(channel).flow_count, 2);
    }
    assert_eq!(fixture.count(TelemetryEvent::ReportSent(Channel::Le2M)), 0);
    assert_eq!(fixture.engine.task_status(Mode::Sender), TaskStatus::Idle);
}

#[test]
fn failed_stops_are_logged_and_the_round_goes_on() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    fixture.engine.radio_mut().stop_error = Some(RadioError::Io);
    fixture
        .engine
        .start(Mode::Sender, one_m_only(), NeverAbort)
        .expect("sender should start");

    assert_eq!(fixture.run_to_end(16), (Mode::Sender, StepResult::Done));

    let faults = fixture.lines_for(TelemetryEvent::RadioFault(RadioError::Io));
    assert!(!faults.is_empty(), "stop failures should be reported");
    assert!(
        faults.iter().all(|line| line.starts_with("1M target: ")),
        "unexpected lines {faults:?}"
    );
    assert_eq!(fixture.engine.sender_progress(Channel::Le1M), (500, 500));
}

#[test]
fn finalize_rebroadcasts_scaled_flow_counter() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    fixture
        .engine
        .start(Mode::Sender, one_m_only(), NeverAbort)
        .expect("sender should start");
    fixture.run_to_end(16);

    fixture.advance(Duration::from_secs(4));

    let form = fixture.engine.form(Channel::Le1M);
    assert_eq!(form.flow_count, 500, "two rounds scale to 500 packets");
    let target = TargetId::channel(Channel::Le1M);
    assert_eq!(
        fixture.engine.radio().starts_on(target).last(),
        Some(&StartParams::timed(Duration::from_secs(5)))
    );

    // The scaled counter is only pushed once.
    fixture.advance(Duration::from_secs(6));
    assert_eq!(fixture.engine.form(Channel::Le1M).flow_count, 500);
}

#[test]
fn echoed_report_is_acknowledged() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    let echo = DeviceInfo {
        pre_count: Phase::REPORT_TAG,
        flow_count: 1,
        ..DeviceInfo::new(u64::from_le_bytes(LOCAL_ADDRESS))
    };
    // Pre-delay ends at 4 s, the countdown at 7 s and the burst 11.35 s later.
    fixture
        .engine
        .radio_mut()
        .schedule(18_600, sender_report(Channel::Le1M, &echo, -45));

    fixture
        .engine
        .start(Mode::Sender, one_m_only(), NeverAbort)
        .expect("sender should start");
    assert_eq!(fixture.run_to_end(16), (Mode::Sender, StepResult::Done));

    assert_eq!(fixture.count(TelemetryEvent::AckReceived(Channel::Le1M)), 1);
}

#[test]
fn abort_during_countdown_finalizes() {
    let mut fixture = Fixture::new();
    let abort = AbortAt {
        now: Rc::clone(&fixture.now),
        at_ms: 5_000,
    };
    fixture
        .engine
        .start(Mode::Sender, one_m_only(), abort)
        .expect("sender should start");

    assert_eq!(fixture.run_to_end(4), (Mode::Sender, StepResult::Aborted));
    assert_eq!(fixture.count(TelemetryEvent::BurstStarted), 0);
    assert_eq!(
        fixture.count(TelemetryEvent::ChannelComplete(Channel::Le1M)),
        0
    );
    assert!(
        fixture
            .lines_for(TelemetryEvent::Note)
            .iter()
            .any(|line| line == "Sender finalized")
    );
    assert_eq!(
        fixture.engine.form(Channel::Le1M).pre_count,
        Phase::COMPLETE_TAG
    );
    assert!(
        fixture
            .engine
            .radio()
            .is_running(TargetId::channel(Channel::Le1M))
    );
    assert_eq!(fixture.engine.task_status(Mode::Sender), TaskStatus::Idle);
}

#[test]
fn releasing_the_token_aborts_before_the_first_round() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    fixture
        .engine
        .start(Mode::Sender, one_m_only(), NeverAbort)
        .expect("sender should start");

    assert_eq!(
        fixture.engine.trigger(Mode::Sender, TriggerRequest::Release),
        None
    );
    assert_eq!(
        fixture.engine.poll(),
        Some((Mode::Sender, StepResult::Aborted))
    );
    assert_eq!(fixture.count(TelemetryEvent::BurstStarted), 0);
    assert_eq!(fixture.engine.poll(), None);
}

#[test]
fn second_mode_is_refused_while_one_runs() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    fixture
        .engine
        .start(Mode::Sender, one_m_only(), NeverAbort)
        .expect("sender should start");

    assert_eq!(
        fixture
            .engine
            .start(Mode::Scanner, one_m_only(), NeverAbort),
        Err(StartError::Busy(Mode::Sender))
    );
    assert_eq!(fixture.engine.task_status(Mode::Scanner), TaskStatus::Blocked);
}

#[test]
fn externally_held_token_blocks_start() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    assert_eq!(
        fixture.engine.trigger(Mode::Numcast, TriggerRequest::Acquire),
        Some(Mode::Numcast)
    );

    assert_eq!(
        fixture
            .engine
            .start(Mode::Sender, one_m_only(), NeverAbort),
        Err(StartError::Busy(Mode::Numcast))
    );
    assert_eq!(fixture.engine.active_mode(), None);
}

#[test]
fn setup_failure_releases_the_token() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    fixture.engine.radio_mut().tx_power_error = Some(RadioError::Io);

    assert_eq!(
        fixture
            .engine
            .start(Mode::Sender, one_m_only(), NeverAbort),
        Err(StartError::Radio(RadioError::Io))
    );
    assert_eq!(fixture.engine.task_status(Mode::Sender), TaskStatus::Idle);
    assert!(
        fixture
            .events()
            .contains(&TelemetryEvent::RadioFault(RadioError::Io))
    );
}

#[test]
fn sender_needs_an_enabled_channel() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    let config = TestConfig {
        channels: ChannelSet::NONE,
        ..TestConfig::default()
    };

    assert!(matches!(
        fixture.engine.start(Mode::Sender, config, NeverAbort),
        Err(StartError::Config(_))
    ));
    assert_eq!(fixture.engine.task_status(Mode::Sender), TaskStatus::Idle);
}
