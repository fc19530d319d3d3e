//! Differential test: random straight-line blocks must behave identically on both backends.

mod common;

use blockjit_cache::il::{IlBlock, IlBuilder, Inst, SlotId, SlotKind};
use blockjit_cache::Backend;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use common::*;

const SLOTS: usize = 8;

fn pick(rng: &mut ChaCha8Rng, slots: &[SlotId]) -> SlotId {
    slots[rng.gen_range(0..slots.len())]
}

fn random_block(rng: &mut ChaCha8Rng) -> IlBlock<TestCpu> {
    let mut b = IlBuilder::new();
    let slots: Vec<SlotId> = (0..SLOTS)
        .map(|i| {
            // Mix small values in so the shift and comparison edge cases actually show up.
            let v = if i % 2 == 0 { rng.gen::<u32>() } else { rng.gen_range(0..40) };
            b.const_u32(v)
        })
        .collect();
    let scratch = b.const_u32(0);
    let dead = [
        b.alloc_slot(SlotKind::Float),
        b.alloc_slot(SlotKind::Double),
        scratch,
    ];

    for _ in 0..rng.gen_range(1..64) {
        let (src, dst) = (pick(rng, &slots), pick(rng, &slots));
        let imm = rng.gen::<u32>();
        let inst = match rng.gen_range(0..27) {
            0 => Inst::Add { src, dst },
            1 => Inst::Sub { src, dst },
            2 => Inst::Xor { src, dst },
            3 => Inst::Mov { src, dst },
            4 => Inst::And { src, dst },
            5 => Inst::Or { src, dst },
            6 => Inst::AddConst { dst, imm },
            7 => Inst::XorConst { dst, imm },
            8 => Inst::AndConst { dst, imm },
            9 => Inst::OrConst { dst, imm },
            10 => Inst::Not { slot: dst },
            11 => Inst::SlotToBool { slot: dst },
            12 => Inst::SignExtend16 { slot: dst },
            13 => Inst::Shll {
                slot: dst,
                amt: rng.gen_range(0..40),
            },
            14 => Inst::Shar {
                slot: dst,
                amt: rng.gen_range(0..40),
            },
            15 => Inst::Shlr {
                slot: dst,
                amt: rng.gen_range(0..40),
            },
            16 => Inst::Shad { val: dst, amt: src },
            17 => Inst::MulU32 { lhs: src, rhs: dst, dst },
            18 => Inst::SetGtUnsigned { lhs: src, rhs: dst, dst },
            19 => Inst::SetGtSigned { lhs: src, rhs: dst, dst },
            20 => Inst::SetEq { lhs: src, rhs: dst, dst },
            21 => Inst::SetGeUnsigned { lhs: src, rhs: dst, dst },
            22 => Inst::SetGeSigned {
                lhs: src,
                rhs: pick(rng, &slots),
                dst,
            },
            23 => Inst::SetGtSignedConst {
                lhs: src,
                imm: imm as i32,
                dst,
            },
            24 => Inst::Cmov {
                flag: pick(rng, &slots),
                expect: rng.gen_bool(0.5),
                src,
                dst,
            },
            25 => Inst::Discard {
                slot: pick(rng, &dead),
            },
            _ => Inst::Cset {
                flag: src,
                expect: rng.gen_bool(0.5),
                imm,
                dst,
            },
        };
        b.push(inst);

        if rng.gen_bool(0.1) {
            // Word-aligned store somewhere inside RAM.
            b.push(Inst::Mov { src, dst: scratch })
                .push(Inst::AndConst {
                    dst: scratch,
                    imm: (RAM_SIZE as u32 - 1) & !3,
                })
                .push(Inst::OrConst {
                    dst: scratch,
                    imm: RAM_BASE,
                })
                .push(Inst::Write32Slot {
                    addr: scratch,
                    src: dst,
                });
        }
    }

    b.push(Inst::StoreSlot {
        src: slots[0],
        dst: set_r0,
    })
    .push(Inst::StoreSlot {
        src: slots[1],
        dst: set_r1,
    })
    .push(Inst::StoreSlot {
        src: slots[2],
        dst: set_r2,
    })
    .push(Inst::StoreSlot {
        src: slots[3],
        dst: set_r3,
    })
    .push(Inst::Jump { addr: slots[SLOTS - 1] });
    b.finish()
}

#[test]
fn interpreter_and_threaded_agree_on_random_blocks() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed_b10c);
    for case in 0..500 {
        let il = random_block(&mut rng);

        let mut interp_cpu = TestCpu::default();
        let interp = run_block(Backend::Interpreter, &il, &mut interp_cpu);
        let mut threaded_cpu = TestCpu::default();
        let threaded = run_block(Backend::Threaded, &il, &mut threaded_cpu);

        assert_eq!(interp, threaded, "case {case}: {il:?}");
        assert!(interp.is_ok(), "case {case}: {interp:?}");
        assert_eq!(interp_cpu.regs, threaded_cpu.regs, "case {case}: {il:?}");
        assert!(
            interp_cpu.mem.as_slice() == threaded_cpu.mem.as_slice(),
            "case {case}: memory diverged"
        );
    }
}
