//! A WebAssembly embedding API written in Rust.
//!
//! wasm-embed lets a host program load WebAssembly modules, inspect what they
//! import and export, instantiate them against host-supplied functions,
//! globals, tables and memories, and call into them.
//!
//! # Modules
//!
//! - [`types`] -- Value kinds, limits and the structural extern types.
//! - [`parser`] -- Hardened binary decoder for module interfaces.
//! - [`vec`] -- [`vec::OwnedVec`], the array-owning container the API returns.
//! - [`runtime`] -- Stores and the handle types the host works with.
//! - [`engine`] -- The backend interface and the bundled interpreter.
//! - [`config`] -- Engine resource limits.
//!
//! # Example
//!
//! Compile a module that imports a host function, instantiate it, and call
//! an export:
//!
//! ```
//! use wasm_embed::runtime::{Engine, Func, Instance, Module, Store, Val};
//! use wasm_embed::types::{FuncType, ValueKind};
//!
//! let binary = wat::parse_str(r#"
//!     (module
//!         (import "env" "double" (func $double (param i32) (result i32)))
//!         (func (export "run") (param i32) (result i32)
//!             local.get 0
//!             call $double
//!             i32.const 1
//!             i32.add))
//! "#).unwrap();
//!
//! let store = Store::new(&Engine::new());
//! let module = Module::new(&store, &binary).unwrap();
//! let double = Func::new(&store, FuncType::new([ValueKind::I32], [ValueKind::I32]), |_, args| {
//!     Ok(vec![Val::I32(args[0].as_i32().unwrap() * 2)])
//! });
//! let instance = Instance::new(&store, &module, &[double.into()]).unwrap();
//! let run = instance.export("run").unwrap();
//! let results = run.as_func().unwrap().call(&[Val::I32(20)]).unwrap();
//! assert_eq!(results, vec![Val::I32(41)]);
//! ```

pub mod config;
pub mod engine;
pub mod parser;
pub mod runtime;
pub mod types;
pub mod vec;

pub use config::Config;
pub use runtime::{Engine, Extern, Func, Global, Instance, Memory, Module, Ref, Store, Table, Trap, Val};
pub use vec::OwnedVec;
