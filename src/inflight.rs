//! Per-URL registry of jobs that are currently running, so that a second
//! request for the same URL waits for the first one instead of repeating it.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::watch;

type Slot<T> = watch::Receiver<Option<Option<T>>>;

pub enum Claim<T: Clone> {
    /// Nobody is working on this key; the caller does the work
    Leader(InFlightGuard<T>),
    /// Somebody else is; wait with [`Follower::wait`]
    Follower(Follower<T>),
}

pub struct InFlight<T: Clone> {
    slots: Arc<Mutex<HashMap<String, Slot<T>>>>,
}

impl<T: Clone> Clone for InFlight<T> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<T: Clone> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Clone> InFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, key: &str) -> Claim<T> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(receiver) = slots.get(key) {
            return Claim::Follower(Follower {
                receiver: receiver.clone(),
            });
        }

        let (sender, receiver) = watch::channel(None);
        slots.insert(key.to_string(), receiver);

        Claim::Leader(InFlightGuard {
            key: key.to_string(),
            sender,
            slots: self.slots.clone(),
            released: false,
        })
    }
}

/// Held by the leader. Completing or dropping it releases the key.
pub struct InFlightGuard<T: Clone> {
    key: String,
    sender: watch::Sender<Option<Option<T>>>,
    slots: Arc<Mutex<HashMap<String, Slot<T>>>>,
    released: bool,
}

impl<T: Clone> InFlightGuard<T> {
    /// `None` tells followers the job failed.
    pub fn complete(mut self, result: Option<T>) {
        self.release();
        let _ = self.sender.send(Some(result));
    }

    /// Removes the key once, and only while it still points at this guard's
    /// channel. A newer leader for the same key keeps its slot.
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let own = self.sender.subscribe();
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(&self.key)
            .is_some_and(|receiver| receiver.same_channel(&own))
        {
            slots.remove(&self.key);
        }
    }
}

impl<T: Clone> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct Follower<T: Clone> {
    receiver: Slot<T>,
}

impl<T: Clone> Follower<T> {
    /// Resolves to the leader's result, or `None` if it failed or went away.
    pub async fn wait(mut self) -> Option<T> {
        match self.receiver.wait_for(|value| value.is_some()).await {
            Ok(value) => value.clone().flatten(),
            Err(_) => None,
        }
    }
}
