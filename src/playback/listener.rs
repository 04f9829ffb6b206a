use chrono::{DateTime, Utc};

/// Anything that must track the playback clock.
///
/// Only `update` is required; the other capabilities default to doing
/// nothing, so a listener without a meaningful pause simply skips it.
pub trait PlaybackListener {
    /// Runs once, when the listener is registered.
    fn initialize(&mut self) {}

    /// Play began, or the listener joined while already playing.
    fn start(&mut self, _current_time: DateTime<Utc>) {}

    /// Every tick and every seek.
    fn update(&mut self, current_time: DateTime<Utc>);

    fn pause(&mut self) {}
}

/// Update-only listener wrapping a closure
pub struct FnListener<F>(F);

impl<F> FnListener<F>
where
    F: FnMut(DateTime<Utc>),
{
    pub fn new(update: F) -> Self {
        FnListener(update)
    }
}

impl<F> PlaybackListener for FnListener<F>
where
    F: FnMut(DateTime<Utc>),
{
    fn update(&mut self, current_time: DateTime<Utc>) {
        (self.0)(current_time)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Listeners in registration order; fan-out always walks them front to back.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    entries: Vec<(ListenerId, Box<dyn PlaybackListener>)>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Box<dyn PlaybackListener>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> Option<Box<dyn PlaybackListener>> {
        let index = self.entries.iter().position(|(entry_id, _)| *entry_id == id)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.entries.iter().any(|(entry_id, _)| *entry_id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<ListenerId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn start_all(&mut self, current_time: DateTime<Utc>) {
        for (_, listener) in self.entries.iter_mut() {
            listener.start(current_time);
        }
    }

    pub fn update_all(&mut self, current_time: DateTime<Utc>) {
        for (_, listener) in self.entries.iter_mut() {
            listener.update(current_time);
        }
    }

    pub fn pause_all(&mut self) {
        for (_, listener) in self.entries.iter_mut() {
            listener.pause();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn fan_out_follows_registration_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        for name in ["slider", "video", "telemetry"] {
            let seen = seen.clone();
            registry.add(Box::new(FnListener::new(move |_| seen.borrow_mut().push(name))));
        }

        registry.update_all(Utc::now());
        assert_eq!(*seen.borrow(), vec!["slider", "video", "telemetry"]);
    }

    #[test]
    fn removal_by_id_from_any_position() {
        let mut registry = ListenerRegistry::new();
        let a = registry.add(Box::new(FnListener::new(|_| {})));
        let b = registry.add(Box::new(FnListener::new(|_| {})));
        let c = registry.add(Box::new(FnListener::new(|_| {})));

        assert!(registry.remove(b).is_some());
        assert!(registry.remove(b).is_none());
        assert!(!registry.contains(b));
        assert!(registry.contains(c));
        assert_eq!(registry.ids(), vec![a, c]);

        registry.remove(a);
        registry.remove(c);
        assert!(registry.is_empty());
    }

    #[test]
    fn missing_capabilities_are_tolerated() {
        let mut registry = ListenerRegistry::new();
        registry.add(Box::new(FnListener::new(|_| {})));
        registry.start_all(Utc::now());
        registry.pause_all();
        assert_eq!(registry.len(), 1);
    }
}
