//! Host-facing handles
//!
//! Everything here is a handle into a [`Store`]: modules, instances,
//! functions, globals, tables, memories, traps and foreign objects. Handles
//! are reference counted per store; `copy` (or `clone`) gives another handle
//! to the same object, and the object's host info is finalized when the last
//! one is dropped. Handles are `!Send`; a module crosses threads as a
//! [`SharedModule`].

pub mod external;
pub mod foreign;
pub mod func;
pub mod global;
mod handle;
pub mod imports;
pub mod instance;
pub mod memory;
pub mod module;
pub mod store;
pub mod table;
pub mod trap;
pub mod value;

pub use external::Extern;
pub use foreign::Foreign;
pub use func::Func;
pub use global::Global;
pub use imports::Imports;
pub use instance::{Instance, InstantiationError};
pub use memory::{Memory, PAGE_SIZE};
pub use module::{Module, SharedModule};
pub use store::{BackendFactory, Engine, Store};
pub use table::Table;
pub use trap::Trap;
pub use value::{Ref, Val};
