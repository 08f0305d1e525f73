mod common;

#[cfg(test)]
mod tests {
    use super::common::{self, Tracked};
    use wasm_embed::runtime::{Engine, Foreign, Func, Global, Instance, Store, Val};
    use wasm_embed::types::{FuncType, GlobalType, Mutability, ValueKind};

    #[test]
    fn test_finalizers_run_once_newest_first() {
        common::init_logging();
        let store = Store::new(&Engine::new());
        let foreign = Foreign::new(&store);
        foreign.set_host_info_with_finalizer(common::make(1), common::finalize);
        foreign.set_host_info_with_finalizer(common::make(2), common::finalize);

        let copy = foreign.copy();
        drop(foreign);
        assert!(common::finalized().is_empty());

        copy.with_host_info(|info: Option<&Tracked>| assert_eq!(info.map(|t| t.0), Some(2)));
        drop(copy);
        assert_eq!(common::finalized(), [2, 1]);
        common::assert_balanced();
    }

    #[test]
    fn test_host_info_is_shared_by_every_handle() {
        let store = Store::new(&Engine::new());
        let module = common::compile(&store, r#"(module (func (export "f")))"#);
        let instance = Instance::new(&store, &module, &[]).unwrap();

        let first = instance.export("f").unwrap().as_func().cloned().unwrap();
        first.set_host_info_with_finalizer(common::make(7), common::finalize);
        let second = instance.export("f").unwrap().as_func().cloned().unwrap();
        assert!(second.same(&first));
        second.with_host_info(|info: Option<&Tracked>| assert_eq!(info.map(|t| t.0), Some(7)));

        drop(first);
        drop(second);
        // the instance still exports it, so a fresh handle sees the same info
        let third = instance.export("f").unwrap().as_func().cloned().unwrap();
        third.with_host_info(|info: Option<&Tracked>| assert_eq!(info.map(|t| t.0), Some(7)));
        drop(third);
        assert!(common::finalized().is_empty());

        drop(instance);
        drop(module);
        drop(store);
        assert_eq!(common::finalized(), [7]);
        common::assert_balanced();
    }

    #[test]
    fn test_host_info_survives_while_a_global_holds_the_object() {
        let store = Store::new(&Engine::new());
        let foreign = Foreign::new(&store);
        foreign.set_host_info_with_finalizer(common::make(1), common::finalize);
        let global = Global::new(
            &store,
            GlobalType::new(ValueKind::AnyRef, Mutability::Var),
            Val::AnyRef(Some(foreign.as_ref())),
        )
        .unwrap();
        drop(foreign);
        assert!(common::finalized().is_empty());

        let back = global.get().as_ref().and_then(|r| r.as_foreign()).unwrap();
        back.with_host_info(|info: Option<&Tracked>| assert_eq!(info.map(|t| t.0), Some(1)));
        drop(back);
        global.set(Val::AnyRef(None));
        drop(global);
        assert!(common::finalized().is_empty());

        drop(store);
        assert_eq!(common::finalized(), [1]);
        common::assert_balanced();
    }

    #[test]
    fn test_unshared_foreign_finalizes_with_its_last_handle() {
        let store = Store::new(&Engine::new());
        let foreign = Foreign::new(&store);
        foreign.set_host_info_with_finalizer(common::make(2), common::finalize);
        assert_eq!(store.live_handles(), 1);
        drop(foreign);
        assert_eq!(common::finalized(), [2]);
        assert_eq!(store.live_handles(), 0);
        common::assert_balanced();
    }

    #[test]
    fn test_info_of_another_type_is_not_visible() {
        let store = Store::new(&Engine::new());
        let global = Global::new(&store, GlobalType::new(ValueKind::I32, Mutability::Const), Val::I32(3)).unwrap();
        global.with_host_info(|info: Option<&String>| assert!(info.is_none()));
        global.set_host_info(String::from("tag"));
        global.with_host_info(|info: Option<&String>| assert_eq!(info.map(String::as_str), Some("tag")));
        global.with_host_info(|info: Option<&u64>| assert!(info.is_none()));
    }

    #[test]
    fn test_every_handle_kind_finalizes() {
        let store = Store::new(&Engine::new());
        let module = common::compile(
            &store,
            r#"(module
                (memory (export "mem") 1)
                (table (export "tab") 1 funcref)
                (global (export "g") i32 (i32.const 0)))"#,
        );
        let instance = Instance::new(&store, &module, &[]).unwrap();
        let func = Func::new(&store, FuncType::new([], []), |_, _| Ok(vec![]));

        module.set_host_info_with_finalizer(common::make(1), common::finalize);
        instance.set_host_info_with_finalizer(common::make(2), common::finalize);
        func.set_host_info_with_finalizer(common::make(3), common::finalize);
        for (tag, export) in instance.exports().iter().enumerate() {
            let tag = 4 + tag as u32;
            match export {
                wasm_embed::Extern::Memory(m) => m.set_host_info_with_finalizer(common::make(tag), common::finalize),
                wasm_embed::Extern::Table(t) => t.set_host_info_with_finalizer(common::make(tag), common::finalize),
                wasm_embed::Extern::Global(g) => g.set_host_info_with_finalizer(common::make(tag), common::finalize),
                wasm_embed::Extern::Func(f) => f.set_host_info_with_finalizer(common::make(tag), common::finalize),
            }
        }
        // the exports were temporaries, but the instance still holds them
        assert_eq!(instance.exports().len(), 3);
        assert!(common::finalized().is_empty());

        drop(func);
        drop(instance);
        drop(module);
        let mut finalized = common::finalized();
        finalized.sort_unstable();
        assert_eq!(finalized, [1, 2, 3]);

        drop(store);
        let mut finalized = common::finalized();
        finalized.sort_unstable();
        assert_eq!(finalized, [1, 2, 3, 4, 5, 6]);
        common::assert_balanced();
    }

    #[test]
    fn test_trap_host_info() {
        let store = Store::new(&Engine::new());
        let fail = Func::new(&store, FuncType::default(), |store, _| Err(wasm_embed::Trap::new(store, "no")));
        let trap = fail.call(&[]).unwrap_err();
        trap.set_host_info_with_finalizer(common::make(9), common::finalize);
        assert_eq!(trap.message(), "no");
        drop(trap);
        assert_eq!(common::finalized(), [9]);
        common::assert_balanced();
    }
}
