use std::fmt;

/// Lifecycle state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeState {
    #[default]
    Uninitialized,
    Initializing,
    SourceLoading,
    Running,
    Ready,
    /// Terminal for the current generation; only `reload` leaves it.
    Failed,
    Reloading,
}

impl BridgeState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::SourceLoading => "source-loading",
            Self::Running => "running",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Reloading => "reloading",
        }
    }

    /// States from which a reload may be started.
    pub fn can_reload(self) -> bool {
        !matches!(self, Self::Uninitialized | Self::Reloading)
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Observer<T> = Box<dyn FnMut(&T)>;

/// A value with change notification.
///
/// Observers run synchronously on the owner thread, only when the value
/// actually changes.
pub struct Observable<T> {
    value: T,
    observers: Vec<Observer<T>>,
}

impl<T: PartialEq> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            observers: Vec::new(),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&T) + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Store `value`, notifying observers if it differs. Returns whether it
    /// changed.
    pub fn set(&mut self, value: T) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        for observer in &mut self.observers {
            observer(&self.value);
        }
        true
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("value", &self.value)
            .field("observers", &self.observers.len())
            .finish()
    }
}
