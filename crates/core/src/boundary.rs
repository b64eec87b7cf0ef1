//! Render-failure containment.
//!
//! An [`ErrorBoundary`] wraps a view and keeps a panic inside that view from
//! taking the whole page down: the subtree is swapped for a fixed fallback
//! and the failure is reported once. A boundary never forgets a failure;
//! remounting a route builds a fresh one.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Markup substituted for a failed subtree.
pub const FALLBACK_MARKUP: &str =
    "<div><h2 class=\"error\">An unexpected error has occurred.</h2></div>";

/// Anything that renders itself to markup. Rendering may panic; boundaries
/// exist to contain exactly that.
pub trait View: Send + Sync {
    fn render(&self) -> String;
}

impl<F> View for F
where
    F: Fn() -> String + Send + Sync,
{
    fn render(&self) -> String {
        self()
    }
}

impl View for Box<dyn View> {
    fn render(&self) -> String {
        (**self).render()
    }
}

/// Wraps a child view and substitutes [`FALLBACK_MARKUP`] once the child has
/// failed to render.
///
/// Failures during child construction happen before the boundary exists and
/// are not contained; only panics raised inside `render` are.
pub struct ErrorBoundary {
    child: Box<dyn View>,
    has_error: AtomicBool,
}

impl ErrorBoundary {
    pub fn new(child: impl View + 'static) -> Self {
        Self::from_child(Box::new(child))
    }

    pub fn from_child(child: Box<dyn View>) -> Self {
        Self {
            child,
            has_error: AtomicBool::new(false),
        }
    }

    /// Whether the child has ever failed. Never goes back to `false`.
    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::Acquire)
    }

    /// Renders the child, or the fallback once the child has failed.
    ///
    /// The first failure flips `has_error` and logs the panic payload; later
    /// renders return the fallback without touching the child again.
    pub fn render(&self) -> String {
        if self.has_error() {
            return FALLBACK_MARKUP.to_string();
        }
        match catch_unwind(AssertUnwindSafe(|| self.child.render())) {
            Ok(markup) => markup,
            Err(payload) => {
                if !self.has_error.swap(true, Ordering::AcqRel) {
                    tracing::error!(
                        reason = panic_message(payload.as_ref()),
                        "view failed to render, substituting fallback"
                    );
                }
                FALLBACK_MARKUP.to_string()
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

type ViewFactory = Arc<dyn Fn() -> Box<dyn View> + Send + Sync>;

/// A route whose component always renders inside a boundary.
///
/// Each match builds the component and a fresh [`ErrorBoundary`] around it,
/// so a failure on one visit does not poison the next.
pub struct RoutedBoundary {
    path: String,
    component: ViewFactory,
}

impl std::fmt::Debug for RoutedBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedBoundary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RoutedBoundary {
    pub fn builder(path: impl Into<String>) -> RoutedBoundaryBuilder {
        RoutedBoundaryBuilder {
            path: path.into(),
            component: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Builds the component inside a fresh boundary, as on a route match.
    pub fn mount(&self) -> ErrorBoundary {
        ErrorBoundary::from_child((self.component)())
    }
}

pub struct RoutedBoundaryBuilder {
    path: String,
    component: Option<ViewFactory>,
}

impl RoutedBoundaryBuilder {
    pub fn component<V, F>(mut self, factory: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: View + 'static,
    {
        self.component = Some(Arc::new(move || Box::new(factory()) as Box<dyn View>));
        self
    }

    /// A route without a component is a wiring mistake, caught at setup.
    pub fn build(self) -> Result<RoutedBoundary> {
        let component = self.component.ok_or_else(|| {
            Error::InvalidConfig(format!("route {} requires a component", self.path))
        })?;
        Ok(RoutedBoundary {
            path: self.path,
            component,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Healthy;

    impl View for Healthy {
        fn render(&self) -> String {
            "<p>all good</p>".to_string()
        }
    }

    struct AlwaysPanics {
        calls: Arc<AtomicUsize>,
    }

    impl View for AlwaysPanics {
        fn render(&self) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("boom");
        }
    }

    #[test]
    fn healthy_child_passes_through() {
        let boundary = ErrorBoundary::new(Healthy);
        assert_eq!(boundary.render(), "<p>all good</p>");
        assert!(!boundary.has_error());
    }

    #[test]
    fn failed_child_is_replaced_by_the_fixed_fallback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let boundary = ErrorBoundary::new(AlwaysPanics {
            calls: calls.clone(),
        });
        assert_eq!(
            boundary.render(),
            "<div><h2 class=\"error\">An unexpected error has occurred.</h2></div>"
        );
        assert!(boundary.has_error());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_sticks_and_the_child_is_never_rendered_again() {
        let calls = Arc::new(AtomicUsize::new(0));
        let boundary = ErrorBoundary::new(AlwaysPanics {
            calls: calls.clone(),
        });
        boundary.render();
        boundary.render();
        boundary.render();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(boundary.has_error());
    }

    #[test]
    fn construction_failures_are_not_contained() {
        fn build_child() -> Healthy {
            panic!("constructor exploded");
        }
        let attempt = catch_unwind(|| ErrorBoundary::new(build_child()));
        assert!(attempt.is_err());
    }

    #[test]
    fn route_without_a_component_is_a_configuration_error() {
        let err = RoutedBoundary::builder("/patients").build().unwrap_err();
        match err {
            Error::InvalidConfig(msg) => assert!(msg.contains("/patients")),
            other => panic!("expected configuration error, got {other}"),
        }
    }

    #[test]
    fn each_mount_gets_a_fresh_boundary() {
        let flaky = Arc::new(AtomicUsize::new(0));
        let route = RoutedBoundary::builder("/patients")
            .component({
                let flaky = flaky.clone();
                move || {
                    let flaky = flaky.clone();
                    move || {
                        if flaky.fetch_add(1, Ordering::SeqCst) == 0 {
                            panic!("first visit fails");
                        }
                        "<p>second visit</p>".to_string()
                    }
                }
            })
            .build()
            .unwrap();

        let first = route.mount();
        assert_eq!(first.render(), FALLBACK_MARKUP);
        assert!(first.has_error());

        let second = route.mount();
        assert_eq!(second.render(), "<p>second visit</p>");
        assert!(!second.has_error());
    }
}
