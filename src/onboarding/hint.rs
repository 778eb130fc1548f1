//! Hint store: the currently displayed hint, observable on its own so the
//! popover can subscribe without reacting to unrelated state changes.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::store::{Store, Subscription};

/// A host-owned DOM node anchoring a step. The controller never queries
/// the DOM itself; it only asks whether the node is still attached.
pub trait AnchorElement: Debug + Send + Sync {
    fn is_connected(&self) -> bool;
}

pub type ElementRef = Arc<dyn AnchorElement>;

/// Minimal anchor for hosts without a real DOM and for tests.
#[derive(Debug)]
pub struct VirtualElement {
    pub id: String,
    connected: AtomicBool,
}

impl VirtualElement {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            connected: AtomicBool::new(true),
        })
    }

    pub fn detach(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl AnchorElement for VirtualElement {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Identity of a displayed hint plus its anchor.
#[derive(Debug, Clone)]
pub struct HintParams {
    pub preset: String,
    pub step: String,
    pub element: ElementRef,
}

#[derive(Debug, Clone, Default)]
pub struct HintState {
    pub open: bool,
    pub hint: Option<HintParams>,
}

/// Observable holder of the single open hint.
#[derive(Debug, Clone)]
pub struct HintStore {
    store: Store<HintState>,
}

impl HintStore {
    pub fn new() -> Self {
        Self {
            store: Store::new(HintState::default()),
        }
    }

    pub fn get_snapshot(&self) -> Arc<HintState> {
        self.store.get_snapshot()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.store.subscribe(listener)
    }

    /// The open hint, if any.
    pub fn current(&self) -> Option<HintParams> {
        let state = self.store.get_snapshot();
        if state.open { state.hint.clone() } else { None }
    }

    pub fn is_open(&self) -> bool {
        self.store.get_snapshot().open
    }

    pub fn is_open_for(&self, step: &str) -> bool {
        self.current().is_some_and(|hint| hint.step == step)
    }

    pub fn show(&self, params: HintParams) {
        self.store.set(HintState {
            open: true,
            hint: Some(params),
        });
    }

    /// Close the open hint when it matches `step` (any hint when `None`).
    /// Returns the closed hint.
    pub fn close(&self, step: Option<&str>) -> Option<HintParams> {
        let current = self.current()?;
        if step.is_some_and(|step| step != current.step) {
            return None;
        }
        self.store.update(|state| state.open = false);
        Some(current)
    }

    /// Re-anchor the open hint for `step` without reopening it.
    /// Returns whether a hint for `step` was open.
    pub fn update_element(&self, step: &str, element: &ElementRef) -> bool {
        let Some(current) = self.current() else {
            return false;
        };
        if current.step != step {
            return false;
        }
        if !Arc::ptr_eq(&current.element, element) {
            let element = Arc::clone(element);
            self.store.update(|state| {
                if let Some(hint) = state.hint.as_mut() {
                    hint.element = element;
                }
            });
        }
        true
    }
}

impl Default for HintStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(step: &str, element: &Arc<VirtualElement>) -> HintParams {
        HintParams {
            preset: "intro".into(),
            step: step.into(),
            element: element.clone(),
        }
    }

    #[test]
    fn show_and_close() {
        let store = HintStore::new();
        let el = VirtualElement::new("a");
        assert!(!store.is_open());

        store.show(params("s1", &el));
        assert!(store.is_open_for("s1"));
        assert!(!store.is_open_for("s2"));

        assert!(store.close(Some("s2")).is_none(), "mismatched step keeps hint open");
        let closed = store.close(None).unwrap();
        assert_eq!(closed.step, "s1");
        assert!(!store.is_open());
        assert!(store.close(None).is_none());
    }

    #[test]
    fn update_element_reanchors_without_reopening() {
        let store = HintStore::new();
        let first = VirtualElement::new("first");
        let second: ElementRef = VirtualElement::new("second");
        store.show(params("s1", &first));

        let before = store.get_snapshot();
        assert!(store.update_element("s1", &second));
        let after = store.get_snapshot();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(Arc::ptr_eq(&store.current().unwrap().element, &second));

        assert!(!store.update_element("other", &second));
    }

    #[test]
    fn virtual_element_detaches() {
        let el = VirtualElement::new("x");
        assert!(el.is_connected());
        el.detach();
        assert!(!el.is_connected());
    }
}
