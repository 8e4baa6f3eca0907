//! Immutable, lexically-scoped name environments.
//!
//! A [`Bindings`] is a persistent linked list of name/value pairs: `bind`
//! prepends in O(1) and shares the tail with the source environment, so
//! snapshots taken while walking a workflow body are cheap. Namespaces are
//! dot-separated name prefixes (`call.output`).

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A single name binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding<T> {
    name: String,
    value: T,
}

impl<T> Binding<T> {
    pub fn new(name: String, value: T) -> Self {
        Self { name, value }
    }

    /// The bound name; namespaced names are dot-separated.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Display> fmt::Display for Binding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.value)
    }
}

struct Node<T> {
    binding: Binding<T>,
    next: Option<Arc<Node<T>>>,
}

/// Immutable environment; newer bindings shadow older ones of the same name.
pub struct Bindings<T> {
    head: Option<Arc<Node<T>>>,
}

impl<T> Clone for Bindings<T> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
        }
    }
}

impl<T> Default for Bindings<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Bindings<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|b| (b.name(), b.value())))
            .finish()
    }
}

impl<T> Bindings<T> {
    pub fn new() -> Self {
        Self { head: None }
    }

    /// Return a new environment with `name` bound, shadowing any earlier
    /// binding of the same name. The receiver is unchanged.
    pub fn bind(&self, name: String, value: T) -> Self {
        debug_assert!(!name.is_empty() && !name.starts_with('.') && !name.ends_with('.'));
        Self {
            head: Some(Arc::new(Node {
                binding: Binding::new(name, value),
                next: self.head.clone(),
            })),
        }
    }

    /// Iterate bindings newest-first, skipping shadowed ones.
    pub fn iter(&self) -> impl Iterator<Item = &Binding<T>> {
        let mut seen: HashSet<String> = HashSet::new();
        BindingsIter {
            node: self.head.as_deref(),
        }
        .filter(move |b| seen.insert(b.name().to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Look up a (possibly dotted) name.
    pub fn resolve(&self, name: &str) -> Option<&T> {
        self.resolve_binding(name).map(|b| b.value())
    }

    pub fn resolve_binding(&self, name: &str) -> Option<&Binding<T>> {
        let mut node = self.head.as_deref();
        while let Some(n) = node {
            if n.binding.name() == name {
                return Some(&n.binding);
            }
            node = n.next.as_deref();
        }
        None
    }

    pub fn has_binding(&self, name: &str) -> bool {
        self.resolve_binding(name).is_some()
    }

    /// Whether any binding lives under the namespace `name.`.
    pub fn has_namespace(&self, name: &str) -> bool {
        let prefix = format!("{}.", name);
        self.iter().any(|b| b.name().starts_with(&prefix))
    }

    /// All dotted-prefix namespaces present, each ending with a dot.
    pub fn namespaces(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        for binding in self.iter() {
            let parts: Vec<&str> = binding.name().split('.').collect();
            for i in 1..parts.len() {
                out.insert(format!("{}.", parts[..i].join(".")));
            }
        }
        out
    }
}

impl<T: Clone> Bindings<T> {
    /// Sub-environment of everything under `name.`, prefix stripped.
    pub fn namespace(&self, name: &str) -> Bindings<T> {
        let prefix = format!("{}.", name);
        let mut inner: Vec<(String, T)> = self
            .iter()
            .filter_map(|b| {
                b.name()
                    .strip_prefix(&prefix)
                    .map(|rest| (rest.to_string(), b.value().clone()))
            })
            .collect();
        let mut out = Bindings::new();
        while let Some((n, v)) = inner.pop() {
            out = out.bind(n, v);
        }
        out
    }

    /// Re-prefix every binding under `namespace.`.
    pub fn wrap_namespace(&self, namespace: &str) -> Bindings<T> {
        let mut entries: Vec<(String, T)> = self
            .iter()
            .map(|b| (format!("{}.{}", namespace, b.name()), b.value().clone()))
            .collect();
        let mut out = Bindings::new();
        while let Some((n, v)) = entries.pop() {
            out = out.bind(n, v);
        }
        out
    }

    /// Transform each binding, dropping those mapped to `None`.
    pub fn filter_map<U: Clone, F>(&self, f: F) -> Bindings<U>
    where
        F: Fn(&Binding<T>) -> Option<U>,
    {
        let mut entries: Vec<(String, U)> = self
            .iter()
            .filter_map(|b| f(b).map(|v| (b.name().to_string(), v)))
            .collect();
        let mut out = Bindings::new();
        while let Some((n, v)) = entries.pop() {
            out = out.bind(n, v);
        }
        out
    }

    /// All bindings of `other` added on top of `self`.
    pub fn extend(&self, other: &Bindings<T>) -> Bindings<T> {
        let mut entries: Vec<(String, T)> = other
            .iter()
            .map(|b| (b.name().to_string(), b.value().clone()))
            .collect();
        let mut out = self.clone();
        while let Some((n, v)) = entries.pop() {
            out = out.bind(n, v);
        }
        out
    }
}

struct BindingsIter<'a, T> {
    node: Option<&'a Node<T>>,
}

impl<'a, T> Iterator for BindingsIter<'a, T> {
    type Item = &'a Binding<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.node?;
        self.node = node.next.as_deref();
        Some(&node.binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_resolve() {
        let env: Bindings<i64> = Bindings::new().bind("x".into(), 1).bind("y".into(), 2);
        assert_eq!(env.resolve("x"), Some(&1));
        assert_eq!(env.resolve("y"), Some(&2));
        assert_eq!(env.resolve("z"), None);
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn shadowing_prefers_newest() {
        let env: Bindings<i64> = Bindings::new().bind("x".into(), 1).bind("x".into(), 9);
        assert_eq!(env.resolve("x"), Some(&9));
        assert_eq!(env.len(), 1, "shadowed binding hidden from iteration");
    }

    #[test]
    fn older_snapshot_unaffected() {
        let old: Bindings<i64> = Bindings::new().bind("x".into(), 1);
        let new = old.bind("y".into(), 2);
        assert!(!old.has_binding("y"));
        assert!(new.has_binding("y"));
    }

    #[test]
    fn namespaces_detected() {
        let env: Bindings<i64> = Bindings::new()
            .bind("align.bam".into(), 1)
            .bind("align.log".into(), 2)
            .bind("n".into(), 3);
        assert!(env.has_namespace("align"));
        assert!(!env.has_namespace("n"));
        assert!(env.namespaces().contains("align."));
    }

    #[test]
    fn namespace_extraction_strips_prefix() {
        let env: Bindings<i64> = Bindings::new()
            .bind("align.bam".into(), 1)
            .bind("other".into(), 2);
        let ns = env.namespace("align");
        assert_eq!(ns.resolve("bam"), Some(&1));
        assert_eq!(ns.len(), 1);
    }

    #[test]
    fn wrap_namespace_round_trip() {
        let env: Bindings<i64> = Bindings::new().bind("bam".into(), 1);
        let wrapped = env.wrap_namespace("align");
        assert_eq!(wrapped.resolve("align.bam"), Some(&1));
        let unwrapped = wrapped.namespace("align");
        assert_eq!(unwrapped.resolve("bam"), Some(&1));
    }

    #[test]
    fn extend_overlays() {
        let base: Bindings<i64> = Bindings::new().bind("x".into(), 1).bind("y".into(), 2);
        let top: Bindings<i64> = Bindings::new().bind("y".into(), 9);
        let merged = base.extend(&top);
        assert_eq!(merged.resolve("x"), Some(&1));
        assert_eq!(merged.resolve("y"), Some(&9));
    }

    #[test]
    fn iteration_order_is_newest_first() {
        let env: Bindings<i64> = Bindings::new().bind("a".into(), 1).bind("b".into(), 2);
        let names: Vec<&str> = env.iter().map(|b| b.name()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
