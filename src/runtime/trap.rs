//! Traps

use std::fmt;
use std::rc::Rc;

use super::handle::{impl_handle, Handle, Object};
use super::store::Store;

/// An abrupt end to a call, raised by guest code or by a host callback
#[derive(Clone, thiserror::Error)]
#[error("{message}")]
pub struct Trap {
    handle: Handle,
    message: Rc<str>,
}

impl_handle!(Trap);

/// Stands in for an empty message
const UNSPECIFIED: &str = "unspecified trap";

impl Trap {
    /// A trap carrying `message`. Messages are never empty; an empty one is
    /// replaced with a generic description.
    pub fn new(store: &Store, message: impl Into<String>) -> Trap {
        let mut message: String = message.into();
        if message.is_empty() {
            message.push_str(UNSPECIFIED);
        }
        Trap {
            handle: Handle::new(store, Object::Trap(store.next_id())),
            message: message.into(),
        }
    }

    /// The reason for the trap, as raised by the engine or the host
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trap").field("message", &self.message).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Engine;

    #[test]
    fn test_message_and_identity() {
        let store = Store::new(&Engine::new());
        let trap = Trap::new(&store, "out of fuel");
        assert_eq!(trap.message(), "out of fuel");
        assert_eq!(trap.to_string(), "out of fuel");

        let copy = trap.copy();
        assert!(copy.same(&trap));
        assert!(!Trap::new(&store, "out of fuel").same(&trap));
    }

    #[test]
    fn test_empty_message_is_replaced() {
        let store = Store::new(&Engine::new());
        let trap = Trap::new(&store, "");
        assert_eq!(trap.message(), "unspecified trap");
        assert!(!trap.to_string().is_empty());
    }
}
