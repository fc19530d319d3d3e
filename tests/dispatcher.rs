use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use blockjit::{
    ExecContext, ExecDispatcher, FlatMemory, GuestAddr, IlBuilder, Inst, JitError, MemFault,
    Translation, TranslationCache, Translator,
};
use blockjit::{AccessWidth, CacheConfig};

const RAM_BASE: GuestAddr = 0x0c00_0000;

const LOOP_HEAD: GuestAddr = 0x8c00_0000;
const LOOP_TAIL: GuestAddr = 0x8c00_0010;
const FLUSH: GuestAddr = 0x8c00_0020;
const FAULT: GuestAddr = 0x8c00_0030;
const FLUSH_THEN_FAULT: GuestAddr = 0x8c00_0040;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

struct Guest {
    mem: FlatMemory,
    cache: Rc<RefCell<TranslationCache<Guest>>>,
    counter: u32,
    after_flush: u32,
    flushes: u32,
}

impl Guest {
    fn new(cache: &Rc<RefCell<TranslationCache<Guest>>>) -> Self {
        Self {
            mem: FlatMemory::new(RAM_BASE, 0x100),
            cache: Rc::clone(cache),
            counter: 0,
            after_flush: 0,
            flushes: 0,
        }
    }
}

impl ExecContext for Guest {
    type Memory = FlatMemory;

    fn memory(&mut self) -> &mut FlatMemory {
        &mut self.mem
    }
}

fn get_counter(cpu: &Guest) -> u32 {
    cpu.counter
}

fn set_counter(cpu: &mut Guest, val: u32) {
    cpu.counter = val;
}

fn set_after_flush(cpu: &mut Guest, val: u32) {
    cpu.after_flush = val;
}

/// Cache-control register write: drops every translation while the block is still running.
fn flush_cache(cpu: &mut Guest, _insn: u32) {
    cpu.cache.borrow_mut().invalidate_all().expect("invalidate");
    cpu.flushes += 1;
}

/// Hand-written guest program keyed by block address.
#[derive(Default)]
struct Program {
    translated: HashMap<GuestAddr, u32>,
}

impl Translator<Guest> for Program {
    type Error = anyhow::Error;

    fn translate(&mut self, _cpu: &mut Guest, addr: GuestAddr) -> Result<Translation<Guest>> {
        *self.translated.entry(addr).or_default() += 1;

        let mut b = IlBuilder::new();
        match addr {
            LOOP_HEAD => {
                let c = b.alloc_slot(blockjit::SlotKind::U32);
                b.push(Inst::LoadSlot { dst: c, src: get_counter })
                    .push(Inst::AddConst { dst: c, imm: 1 })
                    .push(Inst::StoreSlot { src: c, dst: set_counter });
                b.jump_to(LOOP_TAIL);
            }
            LOOP_TAIL => {
                b.jump_to(LOOP_HEAD);
            }
            FLUSH => {
                b.push(Inst::Fallback {
                    handler: flush_cache,
                    payload: 0x402b,
                });
                let marker = b.const_u32(0x5a5a);
                b.push(Inst::StoreSlot {
                    src: marker,
                    dst: set_after_flush,
                });
                b.jump_to(LOOP_HEAD);
            }
            FAULT => {
                let v = b.alloc_slot(blockjit::SlotKind::U32);
                b.push(Inst::Read32Const { dst: v, addr: 0 });
                b.jump_to(LOOP_HEAD);
            }
            FLUSH_THEN_FAULT => {
                b.push(Inst::Fallback {
                    handler: flush_cache,
                    payload: 0x402b,
                });
                let v = b.alloc_slot(blockjit::SlotKind::U32);
                b.push(Inst::Read32Const { dst: v, addr: 0 });
                b.jump_to(LOOP_HEAD);
            }
            _ => return Err(anyhow!("no code at {addr:#010x}")),
        }
        let block = b.finish();
        Ok(Translation {
            cycle_count: block.inst_count() as u32,
            block,
        })
    }
}

type SharedCache = Rc<RefCell<TranslationCache<Guest>>>;

fn setup(config: CacheConfig) -> (SharedCache, ExecDispatcher<Guest, Program>) {
    let cache = Rc::new(RefCell::new(TranslationCache::new(config)));
    let dispatcher = ExecDispatcher::new(Rc::clone(&cache), Program::default());
    (cache, dispatcher)
}

#[test]
fn blocks_are_translated_once_and_reused() -> Result<()> {
    init_tracing();
    let (cache, mut dispatcher) = setup(CacheConfig::default());
    let mut cpu = Guest::new(&cache);

    let pc = dispatcher.run_blocks(&mut cpu, LOOP_HEAD, 20)?;
    assert_eq!(pc, LOOP_HEAD);
    assert_eq!(cpu.counter, 10);
    assert_eq!(dispatcher.translator_mut().translated[&LOOP_HEAD], 1);
    assert_eq!(dispatcher.translator_mut().translated[&LOOP_TAIL], 1);

    let stats = cache.borrow().stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.fast_hits, 18);
    assert_eq!(cache.borrow().len(), 2);
    Ok(())
}

#[test]
fn step_reports_the_block_it_ran() -> Result<()> {
    init_tracing();
    let (cache, mut dispatcher) = setup(CacheConfig::default());
    let mut cpu = Guest::new(&cache);

    let exit = dispatcher.step(&mut cpu, LOOP_HEAD)?;
    assert_eq!(exit.entry, LOOP_HEAD);
    assert_eq!(exit.next, LOOP_TAIL);
    assert_eq!(exit.cycles, 5);
    Ok(())
}

#[test]
fn fallback_can_flush_the_cache_mid_block() -> Result<()> {
    init_tracing();
    for backend in [blockjit::Backend::Interpreter, blockjit::Backend::Threaded] {
        let (cache, mut dispatcher) = setup(CacheConfig::with_backend(backend));
        let mut cpu = Guest::new(&cache);

        dispatcher.run_blocks(&mut cpu, LOOP_HEAD, 4)?;
        assert_eq!(cache.borrow().len(), 2);

        let exit = dispatcher.step(&mut cpu, FLUSH)?;
        assert_eq!(exit.next, LOOP_HEAD);
        // The rest of the block ran after the flush.
        assert_eq!(cpu.after_flush, 0x5a5a);
        assert_eq!(cpu.flushes, 1);

        {
            let cache = cache.borrow();
            assert_eq!(cache.generation(), 1);
            assert!(cache.is_empty());
            assert_eq!(cache.retired_len(), 0, "dispatcher collects after the block returns");
            assert_eq!(cache.stats().generations_collected, 1);
            assert_eq!(cache.stats().entries_collected, 3);
        }

        dispatcher.run_blocks(&mut cpu, exit.next, 2)?;
        assert_eq!(dispatcher.translator_mut().translated[&LOOP_HEAD], 2, "{backend:?}");
        assert_eq!(cpu.counter, 3);
    }
    Ok(())
}

#[test]
fn flushing_block_can_run_again() -> Result<()> {
    init_tracing();
    let (cache, mut dispatcher) = setup(CacheConfig::default());
    let mut cpu = Guest::new(&cache);

    for _ in 0..3 {
        dispatcher.step(&mut cpu, FLUSH)?;
    }
    assert_eq!(cpu.flushes, 3);
    assert_eq!(dispatcher.translator_mut().translated[&FLUSH], 3);
    assert_eq!(cache.borrow().generation(), 3);
    assert_eq!(cache.borrow().retired_len(), 0);
    Ok(())
}

#[test]
fn translation_and_guest_faults_surface_as_jit_errors() {
    init_tracing();
    let (cache, mut dispatcher) = setup(CacheConfig::default());
    let mut cpu = Guest::new(&cache);

    let err = dispatcher.step(&mut cpu, 0x8c00_0100).unwrap_err();
    assert!(matches!(err, JitError::Translate { addr: 0x8c00_0100, .. }), "{err}");
    assert!(!err.is_integrity());

    let err = dispatcher.step(&mut cpu, FAULT).unwrap_err();
    match err {
        JitError::Fault { entry, fault } => {
            assert_eq!(entry, FAULT);
            assert_eq!(
                fault,
                MemFault {
                    addr: 0,
                    width: AccessWidth::W32,
                }
            );
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn retired_generations_are_collected_after_a_faulting_block() {
    init_tracing();
    let (cache, mut dispatcher) = setup(CacheConfig::default());
    let mut cpu = Guest::new(&cache);

    let err = dispatcher.step(&mut cpu, FLUSH_THEN_FAULT).unwrap_err();
    assert!(matches!(err, JitError::Fault { entry: FLUSH_THEN_FAULT, .. }), "{err}");
    assert_eq!(cpu.flushes, 1);

    let cache = cache.borrow();
    assert_eq!(cache.generation(), 1);
    assert_eq!(cache.retired_len(), 0);
    assert_eq!(cache.stats().generations_collected, 1);
    assert_eq!(cache.stats().entries_collected, 1);
}

#[test]
fn entry_ceiling_halts_the_driver() {
    init_tracing();
    let (cache, mut dispatcher) = setup(CacheConfig {
        max_entries: 1,
        ..CacheConfig::default()
    });
    let mut cpu = Guest::new(&cache);

    let err = dispatcher.run_blocks(&mut cpu, LOOP_HEAD, 2).unwrap_err();
    assert!(err.is_integrity(), "{err}");
    assert_eq!(cpu.counter, 1);
}
