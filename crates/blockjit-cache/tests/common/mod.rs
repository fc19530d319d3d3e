#![allow(dead_code)]

use blockjit_cache::il::{ExecContext, FlatMemory, GuestAddr, IlBlock};
use blockjit_cache::{Backend, CacheConfig, ExecError, TranslationCache};

pub const RAM_BASE: GuestAddr = 0x0c00_0000;
pub const RAM_SIZE: usize = 0x1000;
pub const ENTRY: GuestAddr = 0x8c01_0000;

/// Guest CPU used by the cache tests: a handful of registers, flat RAM and a log of every
/// fallback/call the block made.
#[derive(Debug)]
pub struct TestCpu {
    pub regs: [u32; 4],
    pub mem: FlatMemory,
    pub fallbacks: Vec<u32>,
    pub calls: Vec<u32>,
}

impl Default for TestCpu {
    fn default() -> Self {
        Self {
            regs: [0; 4],
            mem: FlatMemory::new(RAM_BASE, RAM_SIZE),
            fallbacks: Vec::new(),
            calls: Vec::new(),
        }
    }
}

impl ExecContext for TestCpu {
    type Memory = FlatMemory;

    fn memory(&mut self) -> &mut FlatMemory {
        &mut self.mem
    }
}

pub fn record_fallback(cpu: &mut TestCpu, payload: u32) {
    cpu.fallbacks.push(payload);
}

pub fn record_call(cpu: &mut TestCpu, val: u32) {
    cpu.calls.push(val);
}

pub fn get_r0(cpu: &TestCpu) -> u32 {
    cpu.regs[0]
}

pub fn get_r1_lo(cpu: &TestCpu) -> u16 {
    cpu.regs[1] as u16
}

pub fn set_r0(cpu: &mut TestCpu, val: u32) {
    cpu.regs[0] = val;
}

pub fn set_r1(cpu: &mut TestCpu, val: u32) {
    cpu.regs[1] = val;
}

pub fn set_r2(cpu: &mut TestCpu, val: u32) {
    cpu.regs[2] = val;
}

pub fn set_r3(cpu: &mut TestCpu, val: u32) {
    cpu.regs[3] = val;
}

pub const BACKENDS: [Backend; 2] = [Backend::Interpreter, Backend::Threaded];

/// Compiles `il` into a fresh cache using `backend` and runs it once.
pub fn run_block(
    backend: Backend,
    il: &IlBlock<TestCpu>,
    cpu: &mut TestCpu,
) -> Result<GuestAddr, ExecError> {
    let mut cache = TranslationCache::new(CacheConfig::with_backend(backend));
    let entry = cache.find(ENTRY).expect("find");
    cache.compile_into(&entry, il, 1).expect("compile");
    entry.execute(cpu)
}
