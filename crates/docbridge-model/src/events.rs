//! Lifecycle events and hook registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::definition::ModelDefinition;
use crate::model::Model;

/// Named points around persistence operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelEvent {
    Saving,
    Saved,
    Creating,
    Created,
    Updating,
    Updated,
    Deleting,
    Deleted,
}

impl ModelEvent {
    /// "-ing" events can veto the operation by returning `false`
    pub fn is_vetoable(&self) -> bool {
        matches!(
            self,
            ModelEvent::Saving | ModelEvent::Creating | ModelEvent::Updating | ModelEvent::Deleting
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelEvent::Saving => "saving",
            ModelEvent::Saved => "saved",
            ModelEvent::Creating => "creating",
            ModelEvent::Created => "created",
            ModelEvent::Updating => "updating",
            ModelEvent::Updated => "updated",
            ModelEvent::Deleting => "deleting",
            ModelEvent::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ModelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hook receives the model and returns `false` to veto.
pub type Hook<D> = Arc<dyn Fn(&mut Model<D>) -> bool + Send + Sync>;

/// Hooks registered per event, fired in registration order.
pub struct Hooks<D: ModelDefinition> {
    listeners: HashMap<ModelEvent, Vec<Hook<D>>>,
}

impl<D: ModelDefinition> Default for Hooks<D> {
    fn default() -> Self {
        Self {
            listeners: HashMap::new(),
        }
    }
}

impl<D: ModelDefinition> Clone for Hooks<D> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<D: ModelDefinition> fmt::Debug for Hooks<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .listeners
            .iter()
            .map(|(event, hooks)| (event.as_str(), hooks.len()))
            .collect();
        f.debug_struct("Hooks").field("listeners", &counts).finish()
    }
}

impl<D: ModelDefinition> Hooks<D> {
    /// Register a hook, builder style
    pub fn on<F>(mut self, event: ModelEvent, hook: F) -> Self
    where
        F: Fn(&mut Model<D>) -> bool + Send + Sync + 'static,
    {
        self.push(event, Arc::new(hook));
        self
    }

    pub fn push(&mut self, event: ModelEvent, hook: Hook<D>) {
        self.listeners.entry(event).or_default().push(hook);
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.values().all(Vec::is_empty)
    }

    /// Run the hooks for an event.
    ///
    /// Returns `false` as soon as a hook vetoes a vetoable event. Hooks of
    /// other events all run and their results are ignored.
    pub fn fire(&self, event: ModelEvent, model: &mut Model<D>) -> bool {
        let Some(hooks) = self.listeners.get(&event) else {
            return true;
        };
        for hook in hooks {
            if !hook(model) && event.is_vetoable() {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docbridge_query::{Connection, MemoryConnection};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Note;

    impl ModelDefinition for Note {
        const NAME: &'static str = "Note";
    }

    fn note() -> Model<Note> {
        let conn: Arc<dyn Connection> = Arc::new(MemoryConnection::new());
        Model::new(conn)
    }

    #[test]
    fn test_vetoable_events() {
        assert!(ModelEvent::Creating.is_vetoable());
        assert!(ModelEvent::Deleting.is_vetoable());
        assert!(!ModelEvent::Created.is_vetoable());
        assert!(!ModelEvent::Saved.is_vetoable());
        assert_eq!(ModelEvent::Updating.to_string(), "updating");
    }

    #[test]
    fn test_veto_stops_remaining_hooks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hooks = Hooks::<Note>::default()
            .on(ModelEvent::Creating, |_| false)
            .on(ModelEvent::Creating, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            });

        let mut model = note();
        assert!(!hooks.fire(ModelEvent::Creating, &mut model));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_non_vetoable_results_are_ignored() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hooks = Hooks::<Note>::default()
            .on(ModelEvent::Created, |_| false)
            .on(ModelEvent::Created, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            });

        let mut model = note();
        assert!(hooks.fire(ModelEvent::Created, &mut model));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hooks_can_mutate_model() {
        let hooks = Hooks::<Note>::default().on(ModelEvent::Saving, |model| {
            model.set_attribute("slug", "generated").is_ok()
        });
        let mut model = note();
        assert!(hooks.fire(ModelEvent::Saving, &mut model));
        assert_eq!(model.attributes(), &doc! { "slug": "generated" });
    }

    #[test]
    fn test_empty_registry_allows_everything() {
        let hooks = Hooks::<Note>::default();
        assert!(hooks.is_empty());
        assert!(hooks.fire(ModelEvent::Deleting, &mut note()));
    }
}
