use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

/// Interface shared by most test buses.
pub trait ValueEvents: Send + Sync {
    fn on_value(&self, value: i32);
    fn value(&self) -> i32;
}

/// Ordered record of which handlers ran.
pub type Journal = Arc<Mutex<Vec<i32>>>;

#[must_use]
pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

#[must_use]
pub fn entries(journal: &Journal) -> Vec<i32> {
    journal.lock().clone()
}

/// Handler that writes its tag into a journal on every event.
#[derive(Debug)]
pub struct Sensor {
    pub tag: i32,
    journal: Journal,
    calls: AtomicUsize,
}

impl Sensor {
    #[must_use]
    pub fn new(tag: i32, journal: &Journal) -> Arc<Self> {
        Arc::new(Self { tag, journal: Arc::clone(journal), calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ValueEvents for Sensor {
    fn on_value(&self, _value: i32) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.journal.lock().push(self.tag);
    }

    fn value(&self) -> i32 {
        self.tag
    }
}

/// WARN and ERROR events seen while [`capture`] ran.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    warnings: Arc<AtomicUsize>,
    errors: Arc<AtomicUsize>,
}

impl Diagnostics {
    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

struct CountingLayer(Diagnostics);

impl<S: Subscriber> Layer<S> for CountingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        match *event.metadata().level() {
            Level::WARN => {
                self.0.warnings.fetch_add(1, Ordering::SeqCst);
            },
            Level::ERROR => {
                self.0.errors.fetch_add(1, Ordering::SeqCst);
            },
            _ => {},
        }
    }
}

/// Runs `f` with a thread-scoped subscriber that counts warnings and errors.
pub fn capture<T>(f: impl FnOnce() -> T) -> (T, Diagnostics) {
    let diagnostics = Diagnostics::default();
    let subscriber = Registry::default().with(CountingLayer(diagnostics.clone()));
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, diagnostics)
}
