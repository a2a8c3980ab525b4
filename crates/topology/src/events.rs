//! Watch stream to create/update/delete translation.
//!
//! A kube watch stream only says "this object now looks like this". The
//! translator keeps the last seen version of every object to tell creates
//! from updates, and turns objects missing from a relist into deletes.

use crate::handler::EventHandler;
use futures::{Stream, StreamExt};
use kube::{Resource, ResourceExt};
use kube_runtime::watcher;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// One translated event.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent<K> {
    /// First sighting of an object
    Create(K),
    /// Object seen before, carrying the previous version
    Update {
        /// Previous version
        old: K,
        /// Current version
        new: K,
    },
    /// Object removed, or missing from a relist
    Delete(K),
}

/// Stateful translator of watch events for one resource kind.
#[derive(Debug)]
pub struct EventTranslator<K> {
    cache: HashMap<String, K>,
    relisted: Option<HashSet<String>>,
}

impl<K> Default for EventTranslator<K> {
    fn default() -> Self {
        Self {
            cache: HashMap::new(),
            relisted: None,
        }
    }
}

fn cache_key<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) => format!("{ns}/{}", obj.name_any()),
        None => obj.name_any(),
    }
}

impl<K> EventTranslator<K>
where
    K: Resource + Clone,
{
    /// Empty translator
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently known
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether no object is known
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Translates one watch event.
    pub fn translate(&mut self, event: watcher::Event<K>) -> Vec<ResourceEvent<K>> {
        match event {
            watcher::Event::Apply(obj) => vec![self.apply(obj)],
            watcher::Event::Delete(obj) => {
                self.cache.remove(&cache_key(&obj));
                vec![ResourceEvent::Delete(obj)]
            }
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(cache_key(&obj));
                }
                vec![self.apply(obj)]
            }
            watcher::Event::InitDone => {
                let Some(seen) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<String> = self.cache.keys().filter(|k| !seen.contains(*k)).cloned().collect();
                gone.into_iter()
                    .filter_map(|key| self.cache.remove(&key))
                    .map(ResourceEvent::Delete)
                    .collect()
            }
        }
    }

    fn apply(&mut self, obj: K) -> ResourceEvent<K> {
        match self.cache.insert(cache_key(&obj), obj.clone()) {
            Some(old) => ResourceEvent::Update { old, new: obj },
            None => ResourceEvent::Create(obj),
        }
    }
}

/// Hands one event to the matching handler method.
pub fn dispatch<K>(handler: &dyn EventHandler<K>, event: &ResourceEvent<K>) {
    match event {
        ResourceEvent::Create(obj) => handler.on_create(obj),
        ResourceEvent::Update { old, new } => handler.on_update(old, new),
        ResourceEvent::Delete(obj) => handler.on_delete(obj),
    }
}

/// Feeds a watch stream into `handler` until the stream ends. Watch errors
/// are logged; the stream is expected to retry on its own.
pub async fn drive<K, S>(stream: S, handler: &dyn EventHandler<K>, kind: &str)
where
    K: Resource + Clone,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>>,
{
    let mut translator = EventTranslator::new();
    let mut stream = std::pin::pin!(stream);
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                for translated in translator.translate(event) {
                    dispatch(handler, &translated);
                }
            }
            Err(e) => warn!(kind = %kind, error = %e, "Watch error"),
        }
    }
    debug!(kind = %kind, "Watch stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{RemoteVtep, RemoteVtepSpec};
    use std::sync::Mutex;

    fn vtep(name: &str, version: &str) -> RemoteVtep {
        let mut vtep = RemoteVtep::new(name, RemoteVtepSpec::default());
        vtep.metadata.resource_version = Some(version.to_string());
        vtep
    }

    fn kinds(events: &[ResourceEvent<RemoteVtep>]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                ResourceEvent::Create(o) => format!("create {}", o.name_any()),
                ResourceEvent::Update { new, .. } => format!("update {}", new.name_any()),
                ResourceEvent::Delete(o) => format!("delete {}", o.name_any()),
            })
            .collect()
    }

    #[test]
    fn test_apply_then_update_then_delete() {
        let mut translator = EventTranslator::new();
        assert_eq!(kinds(&translator.translate(watcher::Event::Apply(vtep("a", "1")))), ["create a"]);

        let update = translator.translate(watcher::Event::Apply(vtep("a", "2")));
        match &update[..] {
            [ResourceEvent::Update { old, new }] => {
                assert_eq!(old.metadata.resource_version.as_deref(), Some("1"));
                assert_eq!(new.metadata.resource_version.as_deref(), Some("2"));
            }
            other => panic!("unexpected events: {other:?}"),
        }

        assert_eq!(kinds(&translator.translate(watcher::Event::Delete(vtep("a", "2")))), ["delete a"]);
        assert!(translator.is_empty());
    }

    #[test]
    fn test_relist_deletes_vanished_objects() {
        let mut translator = EventTranslator::new();
        translator.translate(watcher::Event::Apply(vtep("a", "1")));
        translator.translate(watcher::Event::Apply(vtep("b", "1")));

        assert!(translator.translate(watcher::Event::Init).is_empty());
        assert_eq!(
            kinds(&translator.translate(watcher::Event::InitApply(vtep("a", "1")))),
            ["update a"]
        );
        assert_eq!(
            kinds(&translator.translate(watcher::Event::InitApply(vtep("c", "1")))),
            ["create c"]
        );
        assert_eq!(kinds(&translator.translate(watcher::Event::InitDone)), ["delete b"]);
        assert_eq!(translator.len(), 2);
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl EventHandler<RemoteVtep> for Recorder {
        fn on_create(&self, obj: &RemoteVtep) {
            self.0.lock().unwrap().push(format!("create {}", obj.name_any()));
        }
        fn on_update(&self, _old: &RemoteVtep, new: &RemoteVtep) {
            self.0.lock().unwrap().push(format!("update {}", new.name_any()));
        }
        fn on_delete(&self, obj: &RemoteVtep) {
            self.0.lock().unwrap().push(format!("delete {}", obj.name_any()));
        }
    }

    #[tokio::test]
    async fn test_drive_dispatches_in_order() {
        let recorder = Recorder::default();
        let events: Vec<Result<watcher::Event<RemoteVtep>, watcher::Error>> = vec![
            Ok(watcher::Event::Init),
            Ok(watcher::Event::InitApply(vtep("a", "1"))),
            Ok(watcher::Event::InitDone),
            Ok(watcher::Event::Apply(vtep("a", "2"))),
            Ok(watcher::Event::Delete(vtep("a", "2"))),
        ];
        drive(futures::stream::iter(events), &recorder, "RemoteVtep").await;
        assert_eq!(*recorder.0.lock().unwrap(), ["create a", "update a", "delete a"]);
    }
}
