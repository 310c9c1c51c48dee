mod support;

use core::time::Duration;

use losstest_core::codec::ad::parse_test_packet;
use losstest_core::codec::{DeviceInfo, Phase};
use losstest_core::config::{ChannelSet, NeverAbort, StartParams, TestConfig};
use losstest_core::engine::StepResult;
use losstest_core::phy::Channel;
use losstest_core::radio::TargetId;
use losstest_core::telemetry::TelemetryEvent;
use losstest_core::trigger::{Mode, TaskStatus};

use support::{Fixture, sender_report};

const REMOTE_EUI: u64 = 0x00A0_0000_0000_0002;
const BURST_PACKETS: u64 = 200;

fn one_m_only() -> TestConfig {
    TestConfig {
        channels: ChannelSet::only(Channel::Le1M),
        ..TestConfig::default()
    }
}

fn remote(pre_count: i16, flow_count: u16) -> DeviceInfo {
    DeviceInfo {
        pre_count,
        flow_count,
        ..DeviceInfo::new(REMOTE_EUI)
    }
}

/// Scripts one sender round on 1M: armed, a three second countdown, a burst
/// of [`BURST_PACKETS`], three report packets and the completion tag.
fn script_round(fixture: &mut Fixture<NeverAbort>) {
    let radio = fixture.engine.radio_mut();
    let mut at = |ms: u64, record: DeviceInfo| {
        radio.schedule(ms, sender_report(Channel::Le1M, &record, -50));
    };

    at(3_000, remote(Phase::ARMED_TAG, 0));
    at(3_500, remote(-3, 1));
    at(4_500, remote(-2, 1));
    at(5_500, remote(-1, 1));
    for packet in 0..BURST_PACKETS {
        let tag = i16::try_from(packet + 1).expect("tag fits");
        at(6_000 + packet * 10, remote(tag, 1));
    }
    for ms in [8_500, 8_600, 8_700] {
        at(ms, remote(Phase::REPORT_TAG, 1));
    }
    at(10_000, remote(Phase::COMPLETE_TAG, 1));
}

#[test]
fn scanner_counts_a_full_round_and_echoes_the_report() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    script_round(&mut fixture);
    fixture
        .engine
        .start(Mode::Scanner, one_m_only(), NeverAbort)
        .expect("scanner should start");

    assert_eq!(fixture.run_to_end(1_000), (Mode::Scanner, StepResult::Done));

    assert_eq!(fixture.count(TelemetryEvent::NewSender(Channel::Le1M)), 1);
    assert_eq!(fixture.count(TelemetryEvent::NewFlow(Channel::Le1M)), 1);
    let summaries = fixture.lines_for(TelemetryEvent::SessionSummary(Channel::Le1M));
    assert_eq!(summaries.len(), 1, "the report is summarized once");
    assert!(summaries[0].starts_with("RCV"), "unexpected line {summaries:?}");

    assert_eq!(fixture.engine.received(Channel::Le1M), 200);
    assert_eq!(fixture.engine.receive_counter(Channel::Le1M), 208);
    let reception = fixture.engine.reception(Channel::Le1M);
    assert_eq!(reception.subtotal, 200);
    assert_eq!(reception.flow, 1);
    assert_eq!(reception.key.node, 2);
    assert!(reception.complete);

    let target = TargetId::channel(Channel::Le1M);
    let radio = fixture.engine.radio();
    assert_eq!(
        radio
            .starts_on(target)
            .filter(|start| **start == StartParams::timed(Duration::from_secs(1)))
            .count(),
        1,
        "the report is echoed once"
    );
    let echoed = parse_test_packet(&radio.data[target.index()])
        .expect("echo parses")
        .accepted();
    assert_eq!(echoed, Some(remote(Phase::REPORT_TAG, 1)));

    assert_eq!(radio.scan, None);
    assert_eq!(fixture.engine.scan_method(), None);
    assert_eq!(fixture.engine.task_status(Mode::Scanner), TaskStatus::Idle);
}

#[test]
fn ignored_responses_are_not_echoed() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    script_round(&mut fixture);
    let config = TestConfig {
        ignore_response: true,
        ..one_m_only()
    };
    fixture
        .engine
        .start(Mode::Scanner, config, NeverAbort)
        .expect("scanner should start");

    assert_eq!(fixture.run_to_end(1_000), (Mode::Scanner, StepResult::Done));
    assert_eq!(fixture.engine.received(Channel::Le1M), 200);
    assert!(
        fixture
            .engine
            .radio()
            .starts_on(TargetId::channel(Channel::Le1M))
            .next()
            .is_none()
    );
}

#[test]
fn reports_on_disabled_channels_are_only_counted() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    fixture
        .engine
        .radio_mut()
        .schedule(3_000, sender_report(Channel::Le2M, &remote(-3, 1), -50));
    fixture
        .engine
        .start(Mode::Scanner, one_m_only(), NeverAbort)
        .expect("scanner should start");

    for _ in 0..200 {
        let _ = fixture.engine.poll();
    }

    assert_eq!(fixture.engine.receive_counter(Channel::Le2M), 1);
    assert_eq!(fixture.count(TelemetryEvent::NewSender(Channel::Le2M)), 0);
    assert_eq!(fixture.engine.heard_tag(Channel::Le2M), 0);
}

#[test]
fn silent_scanner_gives_up_after_the_heartbeat() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    fixture
        .engine
        .start(Mode::Scanner, one_m_only(), NeverAbort)
        .expect("scanner should start");

    assert_eq!(
        fixture.run_to_end(5_000),
        (Mode::Scanner, StepResult::Aborted)
    );

    // Listening starts after the two second pre-delay; a 1M-only scan waits
    // 30 s for a sender.
    let now = fixture.now.get();
    assert!((32_000..32_100).contains(&now), "gave up at {now} ms");
    assert_eq!(fixture.engine.radio().scan, None);
    assert_eq!(fixture.count(TelemetryEvent::ModeFinished(Mode::Scanner)), 1);
}
