use num_traits::FromPrimitive;

/// The set of instructions handled by the virtual machine.
///
/// **NOTE:** Changing the order in which members are declared creates
/// incompatibilities between images produced by different versions of the
/// interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_derive::FromPrimitive)]
#[repr(u16)]
pub enum Opcode {
    /// Do nothing.
    Nop,
    /// Push an immediate value; the short argument is its type tag and the
    /// long argument holds the payload (or a function chunk address).
    Val,
    /// Push a pack separator.
    Sep,
    /// Push the element of an array at the index in the long argument.
    Ind,
    /// Push whether the receiver object has the named field.
    Has,
    /// Push the named field of the receiver object.
    Get,
    /// Pop one value and store it into the named field of the receiver.
    Set,
    /// Push the value of a variable looked up through the scope chain.
    Vgt,
    /// Pop one value and store it into a variable.
    Vst,
    /// Push a new scope (short argument 1) or pop the current one (0).
    Scp,
    /// Discard values down to and including the topmost separator; with a
    /// nonzero short argument, panic if any values were actually discarded.
    Dis,
    /// Reverse the topmost value pack in place.
    Rev,
    /// Invoke the operator runtime; the short argument is the operator.
    Opr,
    /// Return from the current function.
    End,
    /// Jump to the long argument if the top pack is boolean `no`.
    Jno,
    /// Jump to the long argument if the top pack is boolean `yes`.
    Jys,
    /// Unconditional jump to the long argument.
    Jmp,
    /// Push a string constant (short: byte length, long: image offset).
    Str,
    /// Collect the topmost pack into an array.
    Arr,
    /// Wrap the current scope's variables and the topmost pack into an
    /// object.
    Obj,
    /// Execute an assignment call (as in `arr[5] = 1`).
    Mov,
    /// Duplicate the topmost pack, re-inserting a separator between copies.
    Dup,
    /// Remove the topmost separator, joining two packs.
    Rem,
    /// Install the metadata (data chunk) base of the current frame; the data
    /// chunk starts with the name of the source file.
    Met,
    /// Extract the contents of a result object. The long argument is where
    /// to jump when the object is not an error; zero means error objects are
    /// propagated to the caller.
    Ext,
    /// Check the pack below the topmost pack against the topmost pack
    /// treated as a list of types; a nonzero short argument ignores excess
    /// values.
    Chk,
    /// Adopt an object's fields as a new scope.
    Osc,
    /// Wrap the topmost pack into a fresh object.
    Wrp,
}

/// Tags of the value union. `Sep` never escapes to user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_derive::FromPrimitive)]
#[repr(u16)]
pub enum TypeTag {
    Sep,
    Int,
    Obj,
    Fun,
    Bln,
    Str,
    Arr,
    Flp,
    Ptr,
    Err,
    Nul,
}

/// Size in bytes of one encoded instruction.
pub const INSTRUCTION_SIZE: usize = 16;

/// A single fixed-width instruction of the bytecode image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: Opcode,
    /// Short argument; its meaning depends on the opcode.
    pub arg: u16,
    /// Offset (relative to the data chunk) of the source position record of
    /// the expression this instruction was generated from.
    pub meta: u32,
    /// Long argument; an immediate, a float bit pattern or an image offset.
    pub data: u64,
}

impl Instruction {
    pub fn new(op: Opcode, meta: u32, arg: u16, data: u64) -> Instruction {
        Instruction { op, arg, meta, data }
    }

    pub fn nop() -> Instruction {
        Instruction::new(Opcode::Nop, 0, 0, 0)
    }

    /// Encodes the instruction in its little-endian wire form.
    pub fn encode(&self) -> [u8; INSTRUCTION_SIZE] {
        let mut bytes = [0u8; INSTRUCTION_SIZE];
        bytes[0..2].copy_from_slice(&(self.op as u16).to_le_bytes());
        bytes[2..4].copy_from_slice(&self.arg.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.meta.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.data.to_le_bytes());
        bytes
    }

    /// Decodes one instruction from the start of `bytes`.
    ///
    /// Returns `None` when fewer than [`INSTRUCTION_SIZE`] bytes are
    /// available or the opcode field holds an unknown value.
    pub fn decode(bytes: &[u8]) -> Option<Instruction> {
        if bytes.len() < INSTRUCTION_SIZE {
            return None;
        }
        let op = u16::from_le_bytes([bytes[0], bytes[1]]);
        let arg = u16::from_le_bytes([bytes[2], bytes[3]]);
        let meta = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let mut data = [0u8; 8];
        data.copy_from_slice(&bytes[8..16]);
        Some(Instruction {
            op: Opcode::from_u16(op)?,
            arg,
            meta,
            data: u64::from_le_bytes(data),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_round_trip_through_encoding() {
        let ins = Instruction::new(Opcode::Val, 12, TypeTag::Int as u16, 0xDEAD_BEEF);
        assert_eq!(Instruction::decode(&ins.encode()), Some(ins));
    }

    #[test]
    fn truncated_or_unknown_instructions_do_not_decode() {
        let ins = Instruction::new(Opcode::Jmp, 0, 0, 64);
        assert_eq!(Instruction::decode(&ins.encode()[..15]), None);

        let mut bytes = ins.encode();
        bytes[0] = 0xFF;
        bytes[1] = 0xFF;
        assert_eq!(Instruction::decode(&bytes), None);
    }
}
