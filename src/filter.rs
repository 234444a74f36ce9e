//! Search and category filtering over note and location collections.
//!
//! [`apply_filter`] is the pure combination of a source list, a free-text
//! query and a category. [`LiveFilter`] keeps the latest value of all three
//! inputs and republishes the combined result on a `watch` channel every time
//! one of them changes.

use crate::models::{Location, Note, NoteFilter};
use std::fmt::Debug;
use std::sync::Mutex;
use tokio::sync::watch;

/// An item that can be narrowed by free text and by a category axis.
pub trait Searchable: Clone + Send + Sync + 'static {
    /// Category axis. Collections without one use `()`.
    type Category: Copy + Default + PartialEq + Debug + Send + Sync + 'static;

    fn search_fields(&self) -> [&str; 2];

    fn in_category(&self, category: Self::Category) -> bool;
}

impl Searchable for Note {
    type Category = NoteFilter;

    fn search_fields(&self) -> [&str; 2] {
        [self.title.as_str(), self.content.as_str()]
    }

    fn in_category(&self, category: NoteFilter) -> bool {
        category.matches(self)
    }
}

impl Searchable for Location {
    type Category = ();

    fn search_fields(&self) -> [&str; 2] {
        [self.name.as_str(), self.address.as_str()]
    }

    fn in_category(&self, _category: ()) -> bool {
        true
    }
}

/// Text filter then category filter. Source order is kept as is.
pub fn apply_filter<T: Searchable>(source: &[T], query: &str, category: T::Category) -> Vec<T> {
    let needle = if query.trim().is_empty() {
        None
    } else {
        Some(query.to_lowercase())
    };

    source
        .iter()
        .filter(|item| match needle.as_deref() {
            None => true,
            Some(needle) => item
                .search_fields()
                .iter()
                .any(|field| field.to_lowercase().contains(needle)),
        })
        .filter(|item| item.in_category(category))
        .cloned()
        .collect()
}

pub fn filter_notes(notes: &[Note], query: &str, filter: NoteFilter) -> Vec<Note> {
    apply_filter(notes, query, filter)
}

pub fn filter_locations(locations: &[Location], query: &str) -> Vec<Location> {
    apply_filter(locations, query, ())
}

struct Inputs<T: Searchable> {
    source: Vec<T>,
    query: String,
    category: T::Category,
}

/// Holds the latest source, query and category and publishes their combined
/// result.
///
/// The inputs live behind one lock and the result is published before the
/// lock is released, so subscribers always observe a value computed from the
/// most recent setting of all three inputs.
pub struct LiveFilter<T: Searchable> {
    inputs: Mutex<Inputs<T>>,
    output: watch::Sender<Vec<T>>,
}

pub type NotesView = LiveFilter<Note>;
pub type LocationsView = LiveFilter<Location>;

impl<T: Searchable> Default for LiveFilter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Searchable> LiveFilter<T> {
    pub fn new() -> Self {
        let (output, _) = watch::channel(Vec::new());
        Self {
            inputs: Mutex::new(Inputs {
                source: Vec::new(),
                query: String::new(),
                category: T::Category::default(),
            }),
            output,
        }
    }

    pub fn set_source(&self, source: Vec<T>) {
        self.update(|inputs| inputs.source = source);
    }

    pub fn set_query(&self, query: impl Into<String>) {
        let query = query.into();
        self.update(|inputs| inputs.query = query);
    }

    pub fn set_category(&self, category: T::Category) {
        self.update(|inputs| inputs.category = category);
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<T>> {
        self.output.subscribe()
    }

    pub fn current(&self) -> Vec<T> {
        self.output.borrow().clone()
    }

    pub fn query(&self) -> String {
        self.lock_inputs().query.clone()
    }

    pub fn category(&self) -> T::Category {
        self.lock_inputs().category
    }

    fn update(&self, mutate: impl FnOnce(&mut Inputs<T>)) {
        let mut inputs = self.lock_inputs();
        mutate(&mut inputs);
        let visible = apply_filter(&inputs.source, &inputs.query, inputs.category);
        self.output.send_replace(visible);
    }

    // Filtering never panics while the lock is held, but a poisoned lock still
    // holds valid inputs.
    fn lock_inputs(&self) -> std::sync::MutexGuard<'_, Inputs<T>> {
        self.inputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
