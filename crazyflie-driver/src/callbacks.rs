use crate::Packet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

pub type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Ordered set of named callbacks.
///
/// Callbacks fire in registration order. Registering a name that already
/// exists replaces the callback but keeps its position.
pub struct CallbackGroup<A: ?Sized> {
    callbacks: Mutex<Vec<(String, Callback<A>)>>,
}

impl<A: ?Sized> Default for CallbackGroup<A> {
    fn default() -> Self {
        CallbackGroup {
            callbacks: Mutex::new(Vec::new()),
        }
    }
}

impl<A: ?Sized> fmt::Debug for CallbackGroup<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl<A: ?Sized> CallbackGroup<A> {
    pub fn register<F>(&self, name: &str, callback: F)
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let callback: Callback<A> = Arc::new(callback);
        let mut callbacks = self.lock();

        match callbacks.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = callback,
            None => callbacks.push((name.to_owned(), callback)),
        }
    }

    /// Remove a callback, returns `false` if there was none with this name
    pub fn remove(&self, name: &str) -> bool {
        let mut callbacks = self.lock();
        let len = callbacks.len();
        callbacks.retain(|(n, _)| n != name);
        callbacks.len() != len
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().iter().any(|(n, _)| n == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    /// Call every callback with `arg`.
    ///
    /// Callbacks are free to register or remove callbacks of this group.
    pub fn call(&self, arg: &A) {
        let callbacks: Vec<Callback<A>> = self.lock().iter().map(|(_, cb)| cb.clone()).collect();

        for callback in callbacks {
            callback(arg);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, Callback<A>)>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Event reported by the radio link
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    /// Link quality, from 0 to 100
    Quality(u8),
    /// The link failed, the string is the reason
    Error(String),
}

/// Every group of callbacks of a [Crazyflie](crate::Crazyflie) session
#[derive(Debug, Default)]
pub struct Callbacks {
    /// Every packet coming from the Crazyflie, before it is queued
    pub received_packet: CallbackGroup<Packet>,
    /// The link has been closed, with its URI
    pub disconnected: CallbackGroup<str>,
    /// The link could not be set up, with the reason
    pub connection_failed: CallbackGroup<str>,
    /// A link is being opened, with its URI
    pub connection_initiated: CallbackGroup<str>,
    /// Both TOCs have been fetched, with the URI
    pub connection_setup_finished: CallbackGroup<str>,
    pub link: CallbackGroup<LinkEvent>,
}
