//! Name-keyed import resolution

use std::collections::HashMap;

use super::external::Extern;
use super::instance::InstantiationError;
use super::module::Module;

/// Externs registered under `(module, name)`, turned into the ordered list a
/// module asks for by [`Imports::resolve`]
#[derive(Debug, Clone, Default)]
pub struct Imports {
    externs: HashMap<(String, String), Extern>,
}

impl Imports {
    /// An empty set of imports
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value`, replacing anything already under the same name
    pub fn define(&mut self, module: impl Into<String>, name: impl Into<String>, value: impl Into<Extern>) {
        self.externs.insert((module.into(), name.into()), value.into());
    }

    /// The extern defined as `module`.`name`, if any
    pub fn get(&self, module: &str, name: &str) -> Option<&Extern> {
        self.externs.get(&(module.to_string(), name.to_string()))
    }

    /// The externs `module` imports, in its declaration order
    ///
    /// # Errors
    ///
    /// `MissingImport` for the first declared import with nothing registered.
    pub fn resolve(&self, module: &Module) -> Result<Vec<Extern>, InstantiationError> {
        module
            .interface()
            .imports
            .iter()
            .map(|import| {
                self.get(import.module(), import.name())
                    .cloned()
                    .ok_or_else(|| InstantiationError::MissingImport {
                        module: import.module().to_string(),
                        name: import.name().to_string(),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Engine, Func, Instance, Store, Val};
    use crate::types::{FuncType, ValueKind};

    #[test]
    fn test_resolve_in_declaration_order() {
        let store = Store::new(&Engine::new());
        let binary = wat::parse_str(
            r#"(module
                (import "env" "one" (func (result i32)))
                (import "env" "two" (func (result i32)))
                (func (export "sum") (result i32) call 0 call 1 i32.add))"#,
        )
        .unwrap();
        let module = Module::new(&store, &binary).unwrap();

        let ty = FuncType::new([], [ValueKind::I32]);
        let mut imports = Imports::new();
        imports.define("env", "two", Func::new(&store, ty.clone(), |_, _| Ok(vec![Val::I32(2)])));
        assert!(matches!(
            imports.resolve(&module),
            Err(InstantiationError::MissingImport { ref name, .. }) if name == "one"
        ));

        imports.define("env", "one", Func::new(&store, ty, |_, _| Ok(vec![Val::I32(1)])));
        let resolved = imports.resolve(&module).unwrap();
        assert!(resolved[1].same(imports.get("env", "two").unwrap()));

        let instance = Instance::with_imports(&store, &module, &imports).unwrap();
        let sum = instance.export("sum").unwrap();
        assert_eq!(sum.as_func().unwrap().call(&[]).unwrap(), vec![Val::I32(3)]);
    }
}
