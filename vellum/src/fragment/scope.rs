//! Per-render variable bindings

use super::value::Value;
use indexmap::IndexMap;
use serde::Serialize;

/// Name/value bindings visible to one executing fragment.
///
/// A scope is built by the caller for a single render and consumed by it.
/// Loop bodies run in their own frame, pushed on top of the caller's
/// bindings and popped when the iteration ends.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Frames, innermost last
    frames: Vec<IndexMap<String, Value>>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            frames: vec![IndexMap::new()],
        }
    }

    /// Build a scope from the top-level fields of a serializable map or struct
    pub fn from_serialize<T: Serialize + ?Sized>(params: &T) -> Result<Self, serde_json::Error> {
        let mut scope = Self::new();
        if let Value::Map(fields) = Value::from_serialize(params)? {
            for (name, value) in fields {
                scope.set(name, value);
            }
        }
        Ok(scope)
    }

    /// Bind a variable in the innermost frame
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), value.into());
        }
    }

    /// Update the nearest frame that already binds `name`, or bind it in
    /// the innermost frame
    pub fn assign(&mut self, name: &str, value: Value) {
        for frame in self.frames.iter_mut().rev() {
            if let Some(slot) = frame.get_mut(name) {
                *slot = value;
                return;
            }
        }
        self.set(name, value);
    }

    /// Get a variable (searches all frames)
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// All bound names, for error messages
    pub fn available_vars(&self) -> Vec<String> {
        let mut vars: Vec<_> = self
            .frames
            .iter()
            .flat_map(|f| f.keys().cloned())
            .collect();
        vars.sort();
        vars.dedup();
        vars
    }

    pub fn push_frame(&mut self) {
        self.frames.push(IndexMap::new());
    }

    /// Pop the innermost frame; the caller's frame is never popped
    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for Scope
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut scope = Self::new();
        for (name, value) in iter {
            scope.set(name, value);
        }
        scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_frames_shadow_and_pop() {
        let mut scope = Scope::from_iter([("user", "outer")]);
        scope.push_frame();
        scope.set("user", "inner");
        assert_eq!(scope.get("user"), Some(&Value::from("inner")));
        scope.pop_frame();
        assert_eq!(scope.get("user"), Some(&Value::from("outer")));
        scope.pop_frame();
        assert_eq!(scope.get("user"), Some(&Value::from("outer")));
    }

    #[test]
    fn assign_updates_the_binding_frame() {
        let mut scope = Scope::from_iter([("total", 0)]);
        scope.push_frame();
        scope.assign("total", Value::Int(3));
        scope.assign("fresh", Value::Bool(true));
        scope.pop_frame();
        assert_eq!(scope.get("total"), Some(&Value::Int(3)));
        assert_eq!(scope.get("fresh"), None);
    }

    #[test]
    fn from_serialize_binds_struct_fields() {
        #[derive(Serialize)]
        struct Page<'a> {
            title: &'a str,
            draft: bool,
        }

        let scope = Scope::from_serialize(&Page {
            title: "Hello",
            draft: false,
        })
        .unwrap();
        assert_eq!(scope.available_vars(), ["draft", "title"]);
        assert_eq!(scope.get("title"), Some(&Value::from("Hello")));
    }
}
