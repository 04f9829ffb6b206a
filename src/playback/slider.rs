use chrono::{DateTime, Utc};

use crate::errors::{RealtimeError, Result};
use crate::playback::clock::PlaybackClock;
use crate::playback::listener::PlaybackListener;
use crate::utils::time_utils::DisplayZone;

/// Minimum simulated drift between two slider redraws.
pub const REDRAW_DRIFT_MS: i64 = 1000;

/// Presentation target for a time slider
pub trait SliderView {
    /// Thumb position in unix seconds.
    fn set_value(&mut self, seconds: i64);

    fn set_label(&mut self, label: &str);

    fn set_range(&mut self, _min: i64, _max: i64) {}
}

/// Keeps a slider in step with the clock, redrawing at most once per
/// simulated second of drift.
pub struct SliderListener<V> {
    view: V,
    zone: DisplayZone,
    last_update: Option<DateTime<Utc>>,
    renders: u64,
}

impl<V: SliderView> SliderListener<V> {
    pub fn new(view: V, zone: DisplayZone) -> Self {
        Self {
            view,
            zone,
            last_update: None,
            renders: 0,
        }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn renders(&self) -> u64 {
        self.renders
    }

    /// Push the playback bounds to the view. Open bounds leave the range as is.
    pub fn configure_range(&mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) {
        if let (Some(start), Some(end)) = (start, end) {
            self.view.set_range(start.timestamp(), end.timestamp());
        }
    }

    fn render(&mut self, time: DateTime<Utc>) {
        self.view.set_value(time.timestamp());
        let label = self.zone.label(time);
        self.view.set_label(&label);
        self.last_update = Some(time);
        self.renders += 1;
    }
}

impl<V: SliderView> PlaybackListener for SliderListener<V> {
    fn start(&mut self, current_time: DateTime<Utc>) {
        self.render(current_time);
    }

    fn update(&mut self, current_time: DateTime<Utc>) {
        let stale = match self.last_update {
            None => true,
            Some(last) => (current_time - last).num_milliseconds().abs() >= REDRAW_DRIFT_MS,
        };
        if stale {
            self.render(current_time);
        }
    }
}

/// Drag-to-seek handling for a slider thumb.
///
/// Dragging pauses a playing clock; releasing seeks and resumes it.
#[derive(Debug, Default)]
pub struct ScrubControl {
    was_playing: bool,
    moving: bool,
}

impl ScrubControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    /// Thumb moved to `seconds`; returns the label to show while dragging.
    pub fn on_slide(&mut self, clock: &mut PlaybackClock, seconds: i64) -> Result<String> {
        let time = from_unix(seconds)?;
        if !self.moving {
            self.was_playing = clock.is_playing();
            if self.was_playing {
                clock.pause();
            }
            self.moving = true;
        }
        Ok(clock.display_zone().label(time))
    }

    /// Thumb released at `seconds`.
    ///
    /// Play resumes if the drag interrupted it, even when the seek is rejected.
    pub fn on_release(&mut self, clock: &mut PlaybackClock, seconds: i64) -> Result<()> {
        let resume = std::mem::take(&mut self.was_playing);
        self.moving = false;

        let seek = from_unix(seconds).and_then(|time| clock.seek(time));
        if resume {
            clock.play();
        }
        seek
    }
}

fn from_unix(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0).ok_or(RealtimeError::InvalidTimestamp(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaybackConfig;
    use chrono::{TimeDelta, TimeZone};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Frame {
        values: Vec<i64>,
        labels: Vec<String>,
        range: Option<(i64, i64)>,
    }

    #[derive(Clone, Default)]
    struct TestView(Rc<RefCell<Frame>>);

    impl SliderView for TestView {
        fn set_value(&mut self, seconds: i64) {
            self.0.borrow_mut().values.push(seconds);
        }
        fn set_label(&mut self, label: &str) {
            self.0.borrow_mut().labels.push(label.to_string());
        }
        fn set_range(&mut self, min: i64, max: i64) {
            self.0.borrow_mut().range = Some((min, max));
        }
    }

    fn t(offset_ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2014, 6, 20, 2, 0, 0).unwrap() + TimeDelta::milliseconds(offset_ms)
    }

    #[test]
    fn redraws_once_per_second_of_drift() {
        let view = TestView::default();
        let mut slider = SliderListener::new(view.clone(), DisplayZone::utc());

        slider.update(t(0));
        slider.update(t(400));
        slider.update(t(999));
        slider.update(t(1000));
        slider.update(t(1500));
        // backwards seeks count as drift too
        slider.update(t(-200));

        assert_eq!(slider.renders(), 3);
        let frame = view.0.borrow();
        assert_eq!(frame.values, vec![t(0).timestamp(), t(1000).timestamp(), t(-200).timestamp()]);
        assert_eq!(frame.labels[0], "02:00:00 UTC");
    }

    #[test]
    fn start_always_renders() {
        let view = TestView::default();
        let mut slider = SliderListener::new(view.clone(), DisplayZone::utc());
        slider.update(t(0));
        slider.start(t(10));
        assert_eq!(slider.renders(), 2);
    }

    #[test]
    fn label_in_display_zone() {
        let view = TestView::default();
        let zone = DisplayZone::parse("America/Los_Angeles").unwrap();
        let mut slider = SliderListener::new(view.clone(), zone);
        slider.configure_range(Some(t(0)), Some(t(3_600_000)));
        slider.update(t(0));

        let frame = view.0.borrow();
        assert_eq!(frame.labels, vec!["19:00:00 PDT".to_string()]);
        assert_eq!(frame.range, Some((t(0).timestamp(), t(3_600_000).timestamp())));
    }

    fn clock() -> PlaybackClock {
        PlaybackClock::with_bounds(&PlaybackConfig::default(), Some(t(0)), Some(t(3_600_000)))
            .unwrap()
    }

    #[test]
    fn scrub_pauses_then_resumes_playback() {
        let mut clock = clock();
        clock.play();
        let mut scrub = ScrubControl::new();

        let label = scrub.on_slide(&mut clock, t(60_000).timestamp()).unwrap();
        assert_eq!(label, "02:01:00 UTC");
        assert!(!clock.is_playing());
        scrub.on_slide(&mut clock, t(120_000).timestamp()).unwrap();
        assert!(scrub.is_moving());

        scrub.on_release(&mut clock, t(120_000).timestamp()).unwrap();
        assert!(clock.is_playing());
        assert_eq!(clock.current_time(), t(120_000));
    }

    #[test]
    fn scrub_leaves_stopped_clock_stopped() {
        let mut clock = clock();
        let mut scrub = ScrubControl::new();
        scrub.on_slide(&mut clock, t(5_000).timestamp()).unwrap();
        scrub.on_release(&mut clock, t(5_000).timestamp()).unwrap();
        assert!(!clock.is_playing());
        assert_eq!(clock.current_time(), t(5_000));
    }

    #[test]
    fn rejected_release_still_resumes() {
        let mut clock = clock();
        clock.play();
        let mut scrub = ScrubControl::new();
        scrub.on_slide(&mut clock, t(0).timestamp()).unwrap();

        let err = scrub
            .on_release(&mut clock, t(7_200_000).timestamp())
            .unwrap_err();
        assert_eq!(err.error_name(), "SeekOutOfRange");
        assert!(clock.is_playing());
        assert_eq!(clock.current_time(), t(0));
    }

    #[test]
    fn unrepresentable_timestamp() {
        let mut clock = clock();
        let err = ScrubControl::new().on_slide(&mut clock, i64::MAX).unwrap_err();
        assert_eq!(err.error_name(), "InvalidTimestamp");
    }
}
