//! Explicit-stack executor
//!
//! A [`Machine`] runs one call to completion on its own operand, label and
//! frame stacks, so guest recursion never consumes native stack. When guest
//! code calls a host function the machine stops with
//! [`Outcome::HostCall`] and keeps its state; the caller runs the host
//! function and continues with [`Machine::resume`].

use std::rc::Rc;

use log::trace;

use super::instruction::{FuncBody, Instr};
use super::stack::Stack;
use super::{ops, FuncInst, ObjectStore, RuntimeError};
use crate::config::Config;
use crate::engine::{FuncAddr, HostFuncId, InstanceAddr, RawVal};

#[derive(Debug)]
pub enum Outcome {
    Done(Vec<RawVal>),
    HostCall {
        func: FuncAddr,
        host: HostFuncId,
        args: Vec<RawVal>,
    },
}

#[derive(Debug, Clone, Copy)]
struct Label {
    /// Values a branch to this label carries
    arity: usize,
    /// Operand stack height below the block's parameters
    height: usize,
    /// Where a branch continues
    target: usize,
    /// Loop labels survive a branch to them
    is_loop: bool,
}

#[derive(Debug)]
struct Frame {
    body: Rc<FuncBody>,
    /// Next instruction; only current while the frame is not running
    pc: usize,
    locals: Vec<RawVal>,
    label_base: usize,
    value_base: usize,
    arity: usize,
    instance: InstanceAddr,
}

/// What the running frame asks of the dispatch loop
enum Flow {
    /// Another frame is now on top
    Switch,
    Suspend(Outcome),
}

#[derive(Debug)]
pub struct Machine {
    stack: Stack,
    labels: Vec<Label>,
    frames: Vec<Frame>,
    result_arity: usize,
    /// Frames held by calls suspended further out
    outer_depth: usize,
    max_call_depth: usize,
    max_value_stack: usize,
}

impl Machine {
    pub fn new(config: &Config, outer_depth: usize) -> Self {
        Machine {
            stack: Stack::new(),
            labels: vec![],
            frames: vec![],
            result_arity: 0,
            outer_depth,
            max_call_depth: config.max_call_depth as usize,
            max_value_stack: config.max_value_stack as usize,
        }
    }

    /// Frames this machine holds, counting itself
    pub fn depth(&self) -> usize {
        self.frames.len() + 1
    }

    pub fn start(&mut self, objects: &mut ObjectStore, func: FuncAddr, args: &[RawVal]) -> Result<Outcome, RuntimeError> {
        self.result_arity = objects.func(func)?.ty().results().len();
        self.stack.push_all(args.iter().copied());
        match self.call(objects, func)? {
            Some(outcome) => Ok(outcome),
            None => self.run(objects),
        }
    }

    /// Continue after a host call with its results
    pub fn resume(&mut self, objects: &mut ObjectStore, results: Vec<RawVal>) -> Result<Outcome, RuntimeError> {
        self.stack.push_all(results);
        self.run(objects)
    }

    /// Enter `func`, its arguments on the stack. Returns the host call to
    /// make if `func` is a host function.
    fn call(&mut self, objects: &ObjectStore, func: FuncAddr) -> Result<Option<Outcome>, RuntimeError> {
        match objects.func(func)? {
            FuncInst::Host { ty, host } => {
                let args = self.stack.pop_n(ty.params().len())?;
                trace!("host call to {:?} with {} arguments", host, args.len());
                Ok(Some(Outcome::HostCall {
                    func,
                    host: *host,
                    args,
                }))
            }
            FuncInst::Wasm { ty, instance, body } => {
                if self.outer_depth + self.frames.len() >= self.max_call_depth {
                    return Err(RuntimeError::CallStackOverflow);
                }
                if self.stack.depth() + body.locals.len() > self.max_value_stack {
                    return Err(RuntimeError::ValueStackExhausted);
                }
                let params = ty.params();
                let mut locals = self.stack.pop_n(params.len())?;
                for (value, kind) in locals.iter().zip(params) {
                    if value.kind() != *kind {
                        return Err(RuntimeError::TypeMismatch {
                            expected: kind.to_string(),
                            actual: value.kind().to_string(),
                        });
                    }
                }
                let declared = body
                    .locals
                    .get(params.len()..)
                    .ok_or(RuntimeError::LocalIndexOutOfBounds(params.len() as u32))?;
                locals.extend(declared.iter().map(|kind| RawVal::default_for(*kind)));
                self.frames.push(Frame {
                    body: Rc::clone(body),
                    pc: 0,
                    locals,
                    label_base: self.labels.len(),
                    value_base: self.stack.depth(),
                    arity: ty.results().len(),
                    instance: *instance,
                });
                Ok(None)
            }
        }
    }

    fn run(&mut self, objects: &mut ObjectStore) -> Result<Outcome, RuntimeError> {
        while let Some(frame) = self.frames.last() {
            let body = Rc::clone(&frame.body);
            let instance = frame.instance;
            if let Flow::Suspend(outcome) = self.run_frame(objects, &body.code, instance)? {
                return Ok(outcome);
            }
        }
        Ok(Outcome::Done(self.stack.pop_n(self.result_arity)?))
    }

    /// Pop the current frame, leaving its results on the stack
    fn return_from_frame(&mut self) -> Result<(), RuntimeError> {
        let frame = self.frames.pop().ok_or(RuntimeError::StackUnderflow)?;
        self.stack.unwind(frame.value_base, frame.arity)?;
        self.labels.truncate(frame.label_base);
        Ok(())
    }

    /// Branch to the label `depth` levels out. Returns the instruction to
    /// continue at, or `None` if the branch leaves the function.
    fn branch(&mut self, depth: u32, label_base: usize) -> Result<Option<usize>, RuntimeError> {
        let depth = depth as usize;
        if depth >= self.labels.len() - label_base {
            self.return_from_frame()?;
            return Ok(None);
        }
        let index = self.labels.len() - 1 - depth;
        let label = self.labels[index];
        self.stack.unwind(label.height, label.arity)?;
        self.labels.truncate(if label.is_loop { index + 1 } else { index });
        Ok(Some(label.target))
    }

    fn block_height(&self, params: u32) -> Result<usize, RuntimeError> {
        self.stack
            .depth()
            .checked_sub(params as usize)
            .ok_or(RuntimeError::StackUnderflow)
    }

    /// Run the top frame until it returns, calls or suspends
    fn run_frame(&mut self, objects: &mut ObjectStore, code: &[Instr], instance: InstanceAddr) -> Result<Flow, RuntimeError> {
        let frame_index = self.frames.len() - 1;
        let label_base = self.frames[frame_index].label_base;
        let mut pc = self.frames[frame_index].pc;

        loop {
            let instr = code.get(pc).ok_or(RuntimeError::BadJump(pc))?;
            pc += 1;

            match instr {
                // Control
                Instr::Unreachable => return Err(RuntimeError::Unreachable),
                Instr::Nop => {}
                Instr::Block { params, results, end } => {
                    let height = self.block_height(*params)?;
                    self.labels.push(Label {
                        arity: *results as usize,
                        height,
                        target: *end as usize + 1,
                        is_loop: false,
                    });
                }
                Instr::Loop { params } => {
                    let height = self.block_height(*params)?;
                    self.labels.push(Label {
                        arity: *params as usize,
                        height,
                        target: pc,
                        is_loop: true,
                    });
                }
                Instr::If {
                    params,
                    results,
                    else_at,
                    end,
                } => {
                    let condition = self.stack.pop_i32()?;
                    let height = self.block_height(*params)?;
                    self.labels.push(Label {
                        arity: *results as usize,
                        height,
                        target: *end as usize + 1,
                        is_loop: false,
                    });
                    if condition == 0 {
                        // without an else, run the `end` so it pops the label
                        pc = else_at.map_or(*end as usize, |at| at as usize + 1);
                    }
                }
                Instr::Else { end } => pc = *end as usize,
                Instr::End => {
                    if self.labels.len() > label_base {
                        self.labels.pop();
                    } else {
                        self.return_from_frame()?;
                        return Ok(Flow::Switch);
                    }
                }
                Instr::Br(depth) => match self.branch(*depth, label_base)? {
                    Some(target) => pc = target,
                    None => return Ok(Flow::Switch),
                },
                Instr::BrIf(depth) => {
                    if self.stack.pop_i32()? != 0 {
                        match self.branch(*depth, label_base)? {
                            Some(target) => pc = target,
                            None => return Ok(Flow::Switch),
                        }
                    }
                }
                Instr::BrTable { targets, default } => {
                    let index = self.stack.pop_u32()? as usize;
                    let depth = targets.get(index).unwrap_or(default);
                    match self.branch(*depth, label_base)? {
                        Some(target) => pc = target,
                        None => return Ok(Flow::Switch),
                    }
                }
                Instr::Return => {
                    self.return_from_frame()?;
                    return Ok(Flow::Switch);
                }
                Instr::Call(index) => {
                    let func = objects.instance_func(instance, *index)?;
                    self.frames[frame_index].pc = pc;
                    return Ok(match self.call(objects, func)? {
                        Some(outcome) => Flow::Suspend(outcome),
                        None => Flow::Switch,
                    });
                }
                Instr::CallIndirect { type_index, table } => {
                    let table = objects.instance_table(instance, *table)?;
                    let element = self.stack.pop_u32()?;
                    let func = match objects.table(table)?.get(element) {
                        Ok(RawVal::FuncRef(Some(func))) => func,
                        Ok(RawVal::FuncRef(None)) => return Err(RuntimeError::UninitializedElement),
                        Ok(other) => {
                            return Err(RuntimeError::TypeMismatch {
                                expected: "funcref".into(),
                                actual: other.kind().to_string(),
                            })
                        }
                        Err(_) => return Err(RuntimeError::UndefinedElement),
                    };
                    let expected = objects.instance_type(instance, *type_index)?;
                    if objects.func(func)?.ty() != expected {
                        return Err(RuntimeError::IndirectCallTypeMismatch);
                    }
                    self.frames[frame_index].pc = pc;
                    return Ok(match self.call(objects, func)? {
                        Some(outcome) => Flow::Suspend(outcome),
                        None => Flow::Switch,
                    });
                }

                // Parametric
                Instr::Drop => {
                    self.stack.pop()?;
                }
                Instr::Select => {
                    let condition = self.stack.pop_i32()?;
                    let b = self.stack.pop()?;
                    let a = self.stack.pop()?;
                    if a.kind() != b.kind() {
                        return Err(RuntimeError::TypeMismatch {
                            expected: a.kind().to_string(),
                            actual: b.kind().to_string(),
                        });
                    }
                    self.stack.push(if condition != 0 { a } else { b });
                }

                // Variables
                Instr::LocalGet(index) => {
                    let value = *self.frames[frame_index]
                        .locals
                        .get(*index as usize)
                        .ok_or(RuntimeError::LocalIndexOutOfBounds(*index))?;
                    self.stack.push(value);
                }
                Instr::LocalSet(index) | Instr::LocalTee(index) => {
                    let value = match instr {
                        Instr::LocalTee(_) => *self.stack.peek().ok_or(RuntimeError::StackUnderflow)?,
                        _ => self.stack.pop()?,
                    };
                    let slot = self.frames[frame_index]
                        .locals
                        .get_mut(*index as usize)
                        .ok_or(RuntimeError::LocalIndexOutOfBounds(*index))?;
                    if slot.kind() != value.kind() {
                        return Err(RuntimeError::TypeMismatch {
                            expected: slot.kind().to_string(),
                            actual: value.kind().to_string(),
                        });
                    }
                    *slot = value;
                }
                Instr::GlobalGet(index) => {
                    let global = objects.instance_global(instance, *index)?;
                    self.stack.push(objects.global(global)?.value);
                }
                Instr::GlobalSet(index) => {
                    let global = objects.instance_global(instance, *index)?;
                    let kind = objects.global(global)?.ty.content();
                    let value = self.stack.pop_typed(kind)?;
                    objects.global_mut(global)?.value = value;
                }

                // Tables
                Instr::TableGet(index) => {
                    let table = objects.instance_table(instance, *index)?;
                    let element = self.stack.pop_u32()?;
                    let value = objects.table(table)?.get(element)?;
                    self.stack.push(value);
                }
                Instr::TableSet(index) => {
                    let table = objects.instance_table(instance, *index)?;
                    let value = self.stack.pop()?;
                    let element = self.stack.pop_u32()?;
                    objects.table_mut(table)?.set(element, value)?;
                }
                Instr::TableSize(index) => {
                    let table = objects.instance_table(instance, *index)?;
                    let size = objects.table(table)?.size();
                    self.stack.push(RawVal::I32(size as i32));
                }
                Instr::TableGrow(index) => {
                    let table = objects.instance_table(instance, *index)?;
                    let delta = self.stack.pop_u32()?;
                    let init = self.stack.pop()?;
                    let old = objects.table_mut(table)?.grow(delta, init);
                    self.stack.push(RawVal::I32(old.map_or(-1, |size| size as i32)));
                }
                Instr::TableFill(index) => {
                    let table = objects.instance_table(instance, *index)?;
                    let len = self.stack.pop_u32()?;
                    let value = self.stack.pop()?;
                    let start = self.stack.pop_u32()?;
                    objects.table_mut(table)?.fill(start, value, len)?;
                }
                Instr::TableCopy { dst, src } => {
                    let dst = objects.instance_table(instance, *dst)?;
                    let src = objects.instance_table(instance, *src)?;
                    let len = self.stack.pop_u32()?;
                    let from = self.stack.pop_u32()?;
                    let to = self.stack.pop_u32()?;
                    let source = objects.table(src)?;
                    let end = from.checked_add(len).filter(|&end| end <= source.size());
                    let Some(end) = end else {
                        return Err(RuntimeError::TableIndexOutOfBounds(from));
                    };
                    let values = (from..end).map(|i| source.get(i)).collect::<Result<Vec<_>, _>>()?;
                    objects.table_mut(dst)?.init(to, &values)?;
                }

                // Memory
                Instr::Load { op, offset } => {
                    let memory = objects.instance_memory(instance)?;
                    ops::load(&mut self.stack, objects.memory(memory)?, *op, *offset)?;
                }
                Instr::Store { op, offset } => {
                    let memory = objects.instance_memory(instance)?;
                    ops::store(&mut self.stack, objects.memory_mut(memory)?, *op, *offset)?;
                }
                Instr::MemorySize => {
                    let memory = objects.instance_memory(instance)?;
                    let pages = objects.memory(memory)?.size();
                    self.stack.push(RawVal::I32(pages as i32));
                }
                Instr::MemoryGrow => {
                    let memory = objects.instance_memory(instance)?;
                    let delta = self.stack.pop_u32()?;
                    let old = objects.memory_mut(memory)?.grow(delta);
                    self.stack.push(RawVal::I32(old.map_or(-1, |pages| pages as i32)));
                }
                Instr::MemoryCopy => {
                    let memory = objects.instance_memory(instance)?;
                    let len = self.stack.pop_u32()?;
                    let src = self.stack.pop_u32()?;
                    let dst = self.stack.pop_u32()?;
                    objects.memory_mut(memory)?.copy_within(dst as u64, src as u64, len as u64)?;
                }
                Instr::MemoryFill => {
                    let memory = objects.instance_memory(instance)?;
                    let len = self.stack.pop_u32()?;
                    let value = self.stack.pop_i32()?;
                    let dst = self.stack.pop_u32()?;
                    objects.memory_mut(memory)?.fill(dst as u64, value as u8, len as u64)?;
                }

                // Numeric
                Instr::I32Const(value) => self.stack.push(RawVal::I32(*value)),
                Instr::I64Const(value) => self.stack.push(RawVal::I64(*value)),
                Instr::F32Const(bits) => self.stack.push(RawVal::F32(f32::from_bits(*bits))),
                Instr::F64Const(bits) => self.stack.push(RawVal::F64(f64::from_bits(*bits))),
                Instr::Numeric(op) => ops::numeric(&mut self.stack, *op)?,
                Instr::TruncSat(sub) => ops::trunc_sat(&mut self.stack, *sub)?,

                // Reference
                Instr::RefNull(kind) => self.stack.push(RawVal::default_for(*kind)),
                Instr::RefIsNull => {
                    let value = self.stack.pop()?;
                    if !value.kind().is_ref() {
                        return Err(RuntimeError::TypeMismatch {
                            expected: "reference".into(),
                            actual: value.kind().to_string(),
                        });
                    }
                    self.stack.push(RawVal::I32(value.is_null() as i32));
                }
                Instr::RefFunc(index) => {
                    let func = objects.instance_func(instance, *index)?;
                    self.stack.push(RawVal::FuncRef(Some(func)));
                }
            }
        }
    }
}
