use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use xgds_realtime::playback::FnListener;
use xgds_realtime::{PlaybackClock, PlaybackConfig, PlaybackListener, SliderListener, SliderView};

fn t(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::seconds(offset_secs)
}

#[derive(Default)]
struct Tally {
    starts: u32,
    updates: Vec<DateTime<Utc>>,
    pauses: u32,
}

struct Counting(Rc<RefCell<Tally>>);

impl PlaybackListener for Counting {
    fn start(&mut self, _current_time: DateTime<Utc>) {
        self.0.borrow_mut().starts += 1;
    }
    fn update(&mut self, current_time: DateTime<Utc>) {
        self.0.borrow_mut().updates.push(current_time);
    }
    fn pause(&mut self) {
        self.0.borrow_mut().pauses += 1;
    }
}

fn hour_clock(config: &PlaybackConfig) -> (PlaybackClock, Rc<RefCell<Tally>>) {
    let mut clock = PlaybackClock::with_bounds(config, Some(t(0)), Some(t(3600))).unwrap();
    let tally = Rc::new(RefCell::new(Tally::default()));
    clock.add_listener(Counting(tally.clone()));
    (clock, tally)
}

#[test]
fn one_hour_range_pauses_exactly_once_at_end() {
    let (mut clock, tally) = hour_clock(&PlaybackConfig::default());
    clock.play();
    for second in 1..=3605 {
        clock.tick(t(second));
    }

    let tally = tally.borrow();
    assert_eq!(clock.current_time(), t(3600));
    assert!(!clock.is_playing());
    assert_eq!(tally.starts, 1);
    assert_eq!(tally.pauses, 1);
    assert_eq!(tally.updates.len(), 3599);
    assert!(tally.updates.iter().all(|time| *time < t(3600)));
}

#[test]
fn listeners_see_ticks_in_registration_order() {
    let mut clock =
        PlaybackClock::with_bounds(&PlaybackConfig::default(), Some(t(0)), None).unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));
    for name in ["slider", "video", "telemetry"] {
        let order = order.clone();
        clock.add_listener(FnListener::new(move |_| order.borrow_mut().push(name)));
    }
    clock.play();
    clock.tick(t(1));
    assert_eq!(*order.borrow(), vec!["slider", "video", "telemetry"]);
}

#[test]
fn rejected_seek_leaves_state_and_fans_out_nothing() {
    let (mut clock, tally) = hour_clock(&PlaybackConfig::default());
    clock.play();
    clock.tick(t(30));

    let err = clock.seek(t(7200)).unwrap_err();
    assert_eq!(err.error_name(), "SeekOutOfRange");
    assert_eq!(clock.current_time(), t(30));
    assert!(clock.is_playing());
    assert_eq!(tally.borrow().updates, vec![t(30)]);
}

#[test]
fn background_ticker_reaches_the_end_bound() {
    // one simulated hour in about 100 ms of wall time
    let config = PlaybackConfig {
        tick_interval_ms: 10,
        initial_speed: 36_000.0,
        ..PlaybackConfig::default()
    };
    let (mut clock, tally) = hour_clock(&config);
    clock.play();

    for _ in 0..500 {
        if !clock.is_playing() {
            break;
        }
        clock.wait_tick(Duration::from_secs(2));
    }

    let tally = tally.borrow();
    assert!(!clock.is_playing());
    assert_eq!(clock.current_time(), t(3600));
    assert_eq!(tally.pauses, 1);
    assert!(tally.updates.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(tally.updates.iter().all(|time| *time < t(3600)));
}

#[test]
fn paused_clock_receives_no_ticks() {
    let config = PlaybackConfig {
        tick_interval_ms: 10,
        ..PlaybackConfig::default()
    };
    let (mut clock, tally) = hour_clock(&config);
    clock.play();
    assert!(clock.wait_tick(Duration::from_secs(2)) > 0);
    clock.pause();
    let frozen = clock.current_time();

    // anything already in flight is discarded
    std::thread::sleep(Duration::from_millis(50));
    clock.poll_ticks();
    let updates = tally.borrow().updates.len();
    assert_eq!(clock.wait_tick(Duration::from_millis(100)), 0);
    assert_eq!(clock.current_time(), frozen);
    assert_eq!(tally.borrow().updates.len(), updates);
}

#[test]
fn seek_wins_over_ticks_already_in_flight() {
    let config = PlaybackConfig {
        tick_interval_ms: 5,
        ..PlaybackConfig::default()
    };
    let (mut clock, tally) = hour_clock(&config);
    clock.play();
    // let a dozen ticks from the old timeline pile up unread
    std::thread::sleep(Duration::from_millis(60));

    clock.seek(t(1800)).unwrap();
    clock.poll_ticks();

    assert!(clock.is_playing());
    assert!(clock.current_time() >= t(1800));
    let tally = tally.borrow();
    assert_eq!(tally.updates[0], t(1800));
    assert!(tally.updates.iter().all(|time| *time >= t(1800)));
}

#[test]
fn stale_ticks_past_the_end_do_not_stop_a_valid_seek() {
    // 18 simulated seconds per 5 ms tick; the backlog overshoots the hour
    let config = PlaybackConfig {
        tick_interval_ms: 5,
        initial_speed: 3600.0,
        ..PlaybackConfig::default()
    };
    let (mut clock, tally) = hour_clock(&config);
    clock.play();
    std::thread::sleep(Duration::from_millis(1200));

    clock.seek(t(10)).unwrap();
    clock.poll_ticks();

    assert!(clock.is_playing());
    assert!(clock.current_time() >= t(10));
    assert!(clock.current_time() < t(3600));
    assert_eq!(tally.borrow().pauses, 0);
}

#[test]
fn resume_after_pause_continues_from_the_frozen_time() {
    // one tick is 60 simulated seconds
    let config = PlaybackConfig {
        tick_interval_ms: 100,
        initial_speed: 600.0,
        ..PlaybackConfig::default()
    };
    let (mut clock, _) = hour_clock(&config);
    clock.play();
    std::thread::sleep(Duration::from_millis(90));
    clock.pause();
    let frozen = clock.current_time();
    assert_eq!(frozen, t(0));

    clock.play();
    assert!(clock.wait_tick(Duration::from_secs(2)) > 0);
    let advanced = clock.current_time() - frozen;
    assert!(advanced >= TimeDelta::seconds(60));
    assert!(advanced < TimeDelta::seconds(90), "advanced {:?}", advanced);
}

#[derive(Clone, Default)]
struct Labels(Rc<RefCell<Vec<String>>>);

impl SliderView for Labels {
    fn set_value(&mut self, _seconds: i64) {}
    fn set_label(&mut self, label: &str) {
        self.0.borrow_mut().push(label.to_string());
    }
}

#[test]
fn slider_follows_fast_playback_at_one_redraw_per_second() {
    let (mut clock, _) = hour_clock(&PlaybackConfig::default());
    let labels = Labels::default();
    clock.add_listener(SliderListener::new(labels.clone(), clock.display_zone()));
    clock.play();

    // 250 ms ticks: every fourth one crosses a full second of drift
    for quarter in 1..=8 {
        clock.tick(t(0) + TimeDelta::milliseconds(250 * quarter));
    }
    assert_eq!(
        *labels.0.borrow(),
        vec!["00:00:00 UTC", "00:00:01 UTC", "00:00:02 UTC"]
    );
}
