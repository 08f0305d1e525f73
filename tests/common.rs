//! Common test utilities shared between integration tests

#![allow(dead_code)]

use std::cell::{Cell, RefCell};

use wasm_embed::runtime::{Module, Store};

thread_local! {
    static MADE: Cell<usize> = const { Cell::new(0) };
    static FINALIZED: RefCell<Vec<u32>> = const { RefCell::new(Vec::new()) };
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Host info whose finalization the harness counts
#[derive(Debug)]
pub struct Tracked(pub u32);

/// New host info tagged `tag`; every one must reach [`finalize`] exactly once
pub fn make(tag: u32) -> Tracked {
    MADE.with(|made| made.set(made.get() + 1));
    Tracked(tag)
}

pub fn finalize(info: Tracked) {
    FINALIZED.with(|finalized| finalized.borrow_mut().push(info.0));
}

/// Tags finalized so far, in order
pub fn finalized() -> Vec<u32> {
    FINALIZED.with(|finalized| finalized.borrow().clone())
}

pub fn assert_balanced() {
    let made = MADE.with(Cell::get);
    let finalized = finalized();
    assert_eq!(made, finalized.len(), "made {made} tracked values, finalized {finalized:?}");
}

pub fn compile(store: &Store, text: &str) -> Module {
    let binary = wat::parse_str(text).expect("test module should assemble");
    Module::new(store, &binary).expect("test module should compile")
}
