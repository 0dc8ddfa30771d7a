// Opcode-level tests driven by hand-assembled images, covering the
// runtime-only opcodes the compiler never emits (`IND`, `WRP`, `OSC`) and
// the image-level execution contract.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use assembler::{Assembler, DATA_CHUNK};
use common::instruction::{Instruction, Opcode, TypeTag, INSTRUCTION_SIZE};
use vm::mm::DefaultAllocator;
use vm::objects::{BytecodeObj, FunKind, FunObj};
use vm::{Config, Value, Vm};

/// Builds a one-chunk image from hand-written instructions. `strings` are
/// appended to the data chunk; an instruction may reference them by index
/// through its long argument (patched to the absolute offset).
fn build_image(instructions: &[(Instruction, Option<usize>)], strings: &[&str]) -> Vec<u8> {
    let mut asm = Assembler::new();
    let data = asm.new_chunk();
    assert_eq!(data, DATA_CHUNK);
    asm.add_string("handmade");
    let string_offsets: Vec<usize> = strings.iter().map(|s| asm.add_string(s)).collect();

    let main = asm.new_chunk();
    let met = asm.put(main, Instruction::new(Opcode::Met, 0, 0, 0));
    asm.add_pointer(main, met + INSTRUCTION_SIZE - 8, DATA_CHUNK, 0);
    asm.put(main, Instruction::new(Opcode::Dis, 0, 0, 0));
    for (ins, string) in instructions {
        let pos = asm.put(main, *ins);
        if let Some(index) = string {
            asm.add_pointer(main, pos + INSTRUCTION_SIZE - 8, DATA_CHUNK, string_offsets[*index]);
        }
    }
    asm.put(main, Instruction::new(Opcode::End, 0, 0, 0));
    asm.assemble()
}

/// Runs an image and returns the final value stack.
fn run_image(image: Vec<u8>) -> (Vm, Vec<Value>, bool) {
    let mut vm = Vm::new(
        Box::new(DefaultAllocator::unlimited()),
        Config::default(),
        Arc::new(AtomicBool::new(false)),
    );
    let stack = vm.new_stack().unwrap();
    let scope = vm.new_base_scope().unwrap();
    let code = vm.mem.gc_new(BytecodeObj { bytes: image }).unwrap();
    let main = vm
        .mem
        .gc_new(FunObj {
            name: Some("<main>".to_string()),
            kind: FunKind::Bytecode { scope: scope.get(), code: code.get(), offset: 0 },
        })
        .unwrap();
    vm.execute(stack.get(), main.get());
    let values = vm.stack_values(stack.get());
    let panicked = vm.is_panicked(stack.get());
    (vm, values, panicked)
}

fn val_int(num: i64) -> (Instruction, Option<usize>) {
    (Instruction::new(Opcode::Val, 0, TypeTag::Int as u16, num as u64), None)
}

fn plain(op: Opcode) -> (Instruction, Option<usize>) {
    (Instruction::new(op, 0, 0, 0), None)
}

#[test]
fn ind_pushes_the_addressed_element() {
    let image = build_image(
        &[
            plain(Opcode::Sep),
            plain(Opcode::Sep),
            val_int(10),
            val_int(20),
            val_int(30),
            plain(Opcode::Arr),
            (Instruction::new(Opcode::Ind, 0, 0, 1), None),
        ],
        &[],
    );
    let (_, values, panicked) = run_image(image);
    assert!(!panicked);
    assert!(matches!(values.as_slice(), [Value::Int(20)]));
}

#[test]
fn ind_panics_out_of_range() {
    let image = build_image(
        &[
            plain(Opcode::Sep),
            plain(Opcode::Sep),
            val_int(10),
            plain(Opcode::Arr),
            (Instruction::new(Opcode::Ind, 0, 0, 7), None),
        ],
        &[],
    );
    let (_, _, panicked) = run_image(image);
    assert!(panicked);
}

#[test]
fn wrp_wraps_the_pack_into_an_object() {
    let image = build_image(
        &[plain(Opcode::Sep), val_int(1), val_int(2), plain(Opcode::Wrp)],
        &[],
    );
    let (vm, values, panicked) = run_image(image);
    assert!(!panicked);
    let [Value::Obj(obj)] = values.as_slice() else { panic!("expected a single object") };
    let positional = &vm.mem.get(*obj).positional;
    assert!(matches!(positional.as_slice(), [Value::Int(1), Value::Int(2)]));
    assert_eq!(vm.mem.get(*obj).field_count(), 0);
}

#[test]
fn osc_adopts_an_object_as_a_scope() {
    // Build `{.x = 42}`-style object by declaring inside a fresh scope,
    // adopt it with OSC, then read `x` back through the scope chain.
    let image = build_image(
        &[
            plain(Opcode::Sep), // Receiver pack of the object value
            (Instruction::new(Opcode::Scp, 0, 1, 0), None),
            val_int(42),
            (Instruction::new(Opcode::Vst, 0, 0, 0), Some(0)), // ".x"
            plain(Opcode::Sep),
            plain(Opcode::Obj),
            (Instruction::new(Opcode::Scp, 0, 0, 0), None),
            plain(Opcode::Osc),
            (Instruction::new(Opcode::Vgt, 0, 0, 0), Some(1)), // "x"
        ],
        &[".x", "x"],
    );
    let (_, values, panicked) = run_image(image);
    assert!(!panicked);
    assert!(matches!(values.as_slice(), [Value::Int(42)]));
}

#[test]
fn unknown_opcodes_panic_instead_of_crashing() {
    let mut image = build_image(&[plain(Opcode::Sep), val_int(1), plain(Opcode::Rem)], &[]);
    // Corrupt the VAL instruction's opcode (third instruction: MET, DIS,
    // SEP come first).
    let offset = 3 * INSTRUCTION_SIZE;
    image[offset] = 0xFF;
    image[offset + 1] = 0xFF;
    let (_, _, panicked) = run_image(image);
    assert!(panicked);
}

#[test]
fn unpinned_stacks_are_collected_with_their_contents() {
    let image = build_image(
        &[
            plain(Opcode::Sep),
            (Instruction::new(Opcode::Str, 0, 4, 0), Some(0)),
            plain(Opcode::Wrp),
        ],
        &["kept"],
    );
    let (mut vm, values, panicked) = run_image(image);
    assert!(!panicked);
    let [Value::Obj(obj)] = values.as_slice() else { panic!() };
    let obj = *obj;
    // The stack handle was dropped inside `run_image`, so nothing roots the
    // stack or the result object any more.
    vm.mem.gc_cycle();
    assert!(!vm.mem.is_live(obj.index()));
}
