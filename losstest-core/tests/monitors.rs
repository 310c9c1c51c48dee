mod support;

use losstest_core::codec::ad::parse_numcast_packet;
use losstest_core::codec::payload::numcast_payload;
use losstest_core::codec::{DeviceInfo, NumcastInfo};
use losstest_core::config::{NeverAbort, StartParams, TestConfig};
use losstest_core::engine::StepResult;
use losstest_core::phy::{Channel, code};
use losstest_core::radio::{ScanMethod, ScanReport, TargetId};
use losstest_core::trigger::{Mode, TriggerRequest};

use support::{Fixture, sender_report};

const REMOTE_EUI: u64 = 0x00A0_0000_0000_0009;

fn numcast_report(channel: Channel, value: u64, rssi: i8) -> ScanReport {
    let payload = numcast_payload(
        channel,
        &DeviceInfo::new(REMOTE_EUI),
        &NumcastInfo::from_value(value),
    )
    .expect("payload fits");
    match channel {
        Channel::Legacy => ScanReport::legacy(rssi, payload),
        _ => ScanReport {
            primary: code::LE_1M,
            secondary: code::LE_1M,
            rssi,
            tx_power: 0,
            payload,
        },
    }
}

fn poll_times(fixture: &mut Fixture<NeverAbort>, polls: usize) {
    for _ in 0..polls {
        assert!(
            matches!(fixture.engine.poll(), Some((_, StepResult::Continue))),
            "monitor stopped early"
        );
    }
}

#[test]
fn numcast_broadcasts_changes_and_tracks_remote_values() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    fixture
        .engine
        .start(Mode::Numcast, TestConfig::default(), NeverAbort)
        .expect("numcast should start");
    assert_eq!(fixture.engine.scan_method(), Some(ScanMethod::AllPhys));

    poll_times(&mut fixture, 1);
    let target = TargetId::channel(Channel::Le1M);
    assert!(
        fixture.engine.radio().starts_on(target).next().is_none(),
        "nothing is broadcast until the host asks"
    );

    fixture.engine.set_numcast_value(42);
    poll_times(&mut fixture, 1);
    let radio = fixture.engine.radio();
    assert_eq!(
        radio.starts_on(target).last(),
        Some(&StartParams::events(10))
    );
    let sent = parse_numcast_packet(&radio.data[target.index()], Channel::Le1M)
        .expect("own payload parses")
        .accepted()
        .map(|sighting| sighting.value);
    assert_eq!(sent, Some(42));
    let legacy = TargetId::channel(Channel::Legacy);
    let sent = parse_numcast_packet(&radio.data[legacy.index()], Channel::Legacy)
        .expect("own payload parses")
        .accepted()
        .map(|sighting| sighting.value);
    assert_eq!(sent, Some(42));

    let at = fixture.now.get() + 20;
    let radio = fixture.engine.radio_mut();
    radio.schedule(at, numcast_report(Channel::Le1M, 77, -40));
    radio.schedule(at + 10, numcast_report(Channel::Legacy, 77, -60));
    poll_times(&mut fixture, 10);

    let snapshot = fixture.engine.numcast();
    assert_eq!(snapshot.broadcasting, 42);
    assert!(!snapshot.auto);
    assert_eq!(snapshot.received, Some(77));
    assert_eq!(snapshot.source, Some(0x0009));
    assert!(snapshot.live[Channel::Le1M.index()]);
    assert!(snapshot.live[Channel::Legacy.index()]);
    assert!(!snapshot.live[Channel::CodedS8.index()]);
    assert_eq!(snapshot.rssi.samples, 2);
    assert_eq!(snapshot.rssi.average, -50);

    fixture.engine.set_numcast_auto(true);
    poll_times(&mut fixture, 1);
    assert_eq!(
        fixture.engine.radio().starts_on(target).last(),
        Some(&StartParams::CONTINUOUS)
    );
    assert!(fixture.engine.numcast().auto);

    assert_eq!(
        fixture.engine.trigger(Mode::Numcast, TriggerRequest::Release),
        None
    );
    assert_eq!(
        fixture.engine.poll(),
        Some((Mode::Numcast, StepResult::Done))
    );
    let snapshot = fixture.engine.numcast();
    assert_eq!(snapshot.received, None);
    assert!(!snapshot.auto);
    assert!(!fixture.engine.radio().is_running(target));
    assert_eq!(fixture.engine.scan_method(), Some(ScanMethod::AllPhys));
}

#[test]
fn envmon_counts_and_summarizes_each_channel() {
    let mut fixture: Fixture<NeverAbort> = Fixture::new();
    let anyone = DeviceInfo::new(REMOTE_EUI);
    let radio = fixture.engine.radio_mut();
    radio.schedule(10, sender_report(Channel::Le1M, &anyone, -40));
    radio.schedule(20, sender_report(Channel::Le1M, &anyone, -60));
    radio.schedule(30, sender_report(Channel::Le1M, &anyone, 25));
    radio.schedule(
        40,
        ScanReport {
            primary: code::LE_CODED,
            secondary: code::LE_1M,
            rssi: -30,
            tx_power: 0,
            payload: sender_report(Channel::Le1M, &anyone, -30).payload,
        },
    );

    fixture
        .engine
        .start(Mode::EnvMon, TestConfig::default(), NeverAbort)
        .expect("envmon should start");
    poll_times(&mut fixture, 10);

    assert_eq!(fixture.engine.env_counter(Channel::Le1M), 3);
    assert_eq!(fixture.engine.env_counter(Channel::CodedS8), 0);
    let summary = fixture.engine.env_summary(Channel::Le1M);
    assert_eq!(summary.samples, 3);
    assert_eq!(summary.max, 20, "RSSI is capped");
    assert_eq!(summary.min, -60);
    assert_eq!(summary.average, -26);
    assert_eq!(fixture.engine.env_summary(Channel::Le2M).samples, 0);

    let _ = fixture
        .engine
        .trigger(Mode::EnvMon, TriggerRequest::Release);
    assert_eq!(
        fixture.engine.poll(),
        Some((Mode::EnvMon, StepResult::Done))
    );
}
