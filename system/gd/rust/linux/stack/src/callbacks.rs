// Copyright 2024, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Provides utilities for managing callbacks.

use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

use crate::{Message, RPCProxy};

/// Utility for managing callbacks conveniently.
pub struct Callbacks<T: Send + ?Sized> {
    callbacks: HashMap<u32, Box<T>>,
    object_id_to_cbid: HashMap<String, u32>,
    next_id: u32,
    tx: UnboundedSender<Message>,
    disconnected_message: fn(u32) -> Message,
}

impl<T: RPCProxy + Send + ?Sized> Callbacks<T> {
    /// Creates new Callbacks.
    ///
    /// Parameters:
    /// `tx`: Sender to use when notifying callback disconnect events.
    /// `disconnected_message`: Constructor of the message to be sent on callback disconnection.
    pub fn new(tx: UnboundedSender<Message>, disconnected_message: fn(u32) -> Message) -> Self {
        Self {
            callbacks: HashMap::new(),
            object_id_to_cbid: HashMap::new(),
            next_id: 1,
            tx,
            disconnected_message,
        }
    }

    /// Stores a new callback and monitors for callback disconnect. Registering the same remote
    /// object twice returns the id it already has.
    ///
    /// Returns the id of the callback.
    pub fn add_callback(&mut self, mut callback: Box<T>) -> u32 {
        let object_id = callback.get_object_id();
        if !object_id.is_empty() {
            if let Some(id) = self.object_id_to_cbid.get(&object_id) {
                return *id;
            }
        }

        let id = self.next_id;
        self.next_id += 1;

        let tx = self.tx.clone();
        let disconnected_message = self.disconnected_message;
        callback.register_disconnect(Box::new(move |_| {
            let _result = tx.send(disconnected_message(id));
        }));

        self.callbacks.insert(id, callback);
        if !object_id.is_empty() {
            self.object_id_to_cbid.insert(object_id, id);
        }
        id
    }

    /// Removes the callback given the id.
    ///
    /// Returns true if the callback is removed, false if there is no such id.
    pub fn remove_callback(&mut self, id: u32) -> bool {
        match self.callbacks.remove(&id) {
            Some(mut c) => {
                self.object_id_to_cbid.retain(|_, cbid| *cbid != id);
                c.unregister(id);
                true
            }
            None => false,
        }
    }

    /// Applies the given function on all active callbacks.
    pub fn for_all_callbacks<F: FnMut(&mut Box<T>)>(&mut self, mut f: F) {
        for (_, callback) in self.callbacks.iter_mut() {
            f(callback);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc::unbounded_channel;

    trait ICounter: RPCProxy {
        fn bump(&mut self);
    }

    struct Counter {
        object_id: String,
        hits: Arc<Mutex<u32>>,
        on_disconnect: Arc<Mutex<Option<Box<dyn Fn(u32) + Send>>>>,
    }

    impl ICounter for Counter {
        fn bump(&mut self) {
            *self.hits.lock().unwrap() += 1;
        }
    }

    impl RPCProxy for Counter {
        fn register_disconnect(&mut self, f: Box<dyn Fn(u32) + Send>) -> u32 {
            *self.on_disconnect.lock().unwrap() = Some(f);
            0
        }

        fn get_object_id(&self) -> String {
            self.object_id.clone()
        }
    }

    fn counter(
        object_id: &str,
    ) -> (Box<Counter>, Arc<Mutex<u32>>, Arc<Mutex<Option<Box<dyn Fn(u32) + Send>>>>) {
        let hits = Arc::new(Mutex::new(0));
        let on_disconnect = Arc::new(Mutex::new(None));
        (
            Box::new(Counter {
                object_id: object_id.to_string(),
                hits: hits.clone(),
                on_disconnect: on_disconnect.clone(),
            }),
            hits,
            on_disconnect,
        )
    }

    #[test]
    fn add_call_and_remove() {
        let (tx, _rx) = unbounded_channel();
        let mut callbacks: Callbacks<dyn ICounter + Send> =
            Callbacks::new(tx, Message::LeAudioCallbackDisconnected);

        let (first, first_hits, _) = counter("/first");
        let (second, second_hits, _) = counter("/second");
        let first_id = callbacks.add_callback(first);
        let second_id = callbacks.add_callback(second);
        assert_ne!(first_id, second_id);

        callbacks.for_all_callbacks(|c| c.bump());
        assert_eq!(*first_hits.lock().unwrap(), 1);
        assert_eq!(*second_hits.lock().unwrap(), 1);

        assert!(callbacks.remove_callback(first_id));
        assert!(!callbacks.remove_callback(first_id));
        callbacks.for_all_callbacks(|c| c.bump());
        assert_eq!(*first_hits.lock().unwrap(), 1);
        assert_eq!(*second_hits.lock().unwrap(), 2);
        assert_eq!(callbacks.len(), 1);
    }

    #[test]
    fn same_object_registers_once() {
        let (tx, _rx) = unbounded_channel();
        let mut callbacks: Callbacks<dyn ICounter + Send> =
            Callbacks::new(tx, Message::LeAudioCallbackDisconnected);

        let (a, _, _) = counter("/same");
        let (b, _, _) = counter("/same");
        assert_eq!(callbacks.add_callback(a), callbacks.add_callback(b));
        assert_eq!(callbacks.len(), 1);
    }

    #[test]
    fn disconnect_posts_message() {
        let (tx, mut rx) = unbounded_channel();
        let mut callbacks: Callbacks<dyn ICounter + Send> =
            Callbacks::new(tx, Message::LeAudioCallbackDisconnected);

        let (c, _, on_disconnect) = counter("/remote");
        let id = callbacks.add_callback(c);
        (on_disconnect.lock().unwrap().as_ref().unwrap())(0);

        match rx.try_recv() {
            Ok(Message::LeAudioCallbackDisconnected(got)) => assert_eq!(got, id),
            _ => panic!("expected a callback disconnected message"),
        }
    }
}
