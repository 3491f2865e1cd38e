//! Chunk disassembler
//!
//! Renders an instruction listing as `OFFSET  LINE  OPCODE  OPERAND`, one
//! instruction per row. Repeated lines print `|` like the rest of the
//! bytecode tooling.

use crate::chunk::{Chunk, Constant, NO_LABEL};
use crate::opcode::Opcode;
use std::fmt::Write;

/// Disassemble an entire chunk under a heading
pub fn disassemble(chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", name);

    let mut offset = 0;
    while offset < chunk.code.len() {
        let (text, next) = disassemble_instruction(chunk, offset);
        out.push_str(&text);
        out.push('\n');
        offset = next;
    }

    for (i, proto) in chunk.functions.iter().enumerate() {
        out.push('\n');
        out.push_str(&disassemble(&proto.chunk, &format!("fn {} #{}", proto.name, i)));
    }

    out
}

/// Disassemble one instruction; returns the rendered row and the offset of
/// the next instruction.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> (String, usize) {
    let mut row = format!("{:04}  ", offset);
    if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        row.push_str("   | ");
    } else {
        row.push_str(&format!("{:4} ", chunk.line_at(offset)));
    }

    let byte = chunk.code[offset];
    let Some(op) = Opcode::from_u8(byte) else {
        let _ = write!(row, " <unknown {:#04x}>", byte);
        return (row, offset + 1);
    };

    let _ = write!(row, " {:<30}", op.name());

    let mut cursor = offset + 1;

    macro_rules! u8_operand {
        () => {{
            let v = chunk.code.get(cursor).copied().unwrap_or(0);
            cursor += 1;
            v
        }};
    }
    macro_rules! u16_operand {
        () => {{
            let lo = chunk.code.get(cursor).copied().unwrap_or(0);
            let hi = chunk.code.get(cursor + 1).copied().unwrap_or(0);
            cursor += 2;
            u16::from_le_bytes([lo, hi])
        }};
    }

    match op {
        // Single-byte instructions
        Opcode::Nop
        | Opcode::Nil
        | Opcode::True
        | Opcode::False
        | Opcode::Pop
        | Opcode::Dup
        | Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Mod
        | Opcode::Neg
        | Opcode::BitNot
        | Opcode::BitAnd
        | Opcode::BitOr
        | Opcode::BitXor
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::Eq
        | Opcode::Ne
        | Opcode::Lt
        | Opcode::Gt
        | Opcode::Le
        | Opcode::Ge
        | Opcode::Not
        | Opcode::And
        | Opcode::Or
        | Opcode::CloseUpvalue
        | Opcode::Return
        | Opcode::Inherit
        | Opcode::Unwrap
        | Opcode::NilCoalesce
        | Opcode::GetSubscript
        | Opcode::SetSubscript
        | Opcode::CopyValue
        | Opcode::EndTry
        | Opcode::Throw
        | Opcode::ReadLine
        | Opcode::Print
        | Opcode::Halt => {}

        Opcode::Const => {
            let idx = u8_operand!();
            let rendered = match chunk.constants.get(idx as usize) {
                Some(Constant::Null) => "null".to_string(),
                Some(Constant::Bool(b)) => b.to_string(),
                Some(Constant::Int(i)) => i.to_string(),
                Some(Constant::Float(f)) => f.to_string(),
                None => "<bad const>".to_string(),
            };
            let _ = write!(row, " {:4} ({})", idx, rendered);
        }

        Opcode::Str
        | Opcode::DefineGlobal
        | Opcode::GetGlobal
        | Opcode::SetGlobal
        | Opcode::Method
        | Opcode::DefineProperty
        | Opcode::GetProperty
        | Opcode::SetProperty
        | Opcode::Super
        | Opcode::GetTupleLabel
        | Opcode::Class
        | Opcode::Struct
        | Opcode::Enum
        | Opcode::MatchEnumCase
        | Opcode::TypeCheck
        | Opcode::TypeCast
        | Opcode::TypeCastOptional
        | Opcode::TypeCastForced => {
            let idx = u16_operand!();
            let name = chunk.string_at(idx as usize).unwrap_or("<bad string>");
            let _ = write!(row, " {:4} '{}'", idx, name);
        }

        Opcode::GetLocal | Opcode::SetLocal | Opcode::GetUpvalue | Opcode::SetUpvalue => {
            let slot = u16_operand!();
            let _ = write!(row, " {:4}", slot);
        }

        Opcode::Jump | Opcode::JumpIfFalse | Opcode::JumpIfNil | Opcode::OptionalChain => {
            let jump = u16_operand!();
            let _ = write!(row, " {:4} -> {}", jump, cursor + jump as usize);
        }

        Opcode::Loop => {
            let jump = u16_operand!();
            let target = cursor as isize - jump as isize;
            let _ = write!(row, " {:4} -> {}", jump, target);
        }

        Opcode::Closure => {
            let idx = u16_operand!();
            let name = chunk
                .functions
                .get(idx as usize)
                .map(|p| p.name.as_str())
                .unwrap_or("<bad proto>");
            let _ = write!(row, " {:4} <fn {}>", idx, name);
        }

        Opcode::Call | Opcode::Array | Opcode::Dict | Opcode::GetTupleIndex
        | Opcode::GetAssociated => {
            let n = u8_operand!();
            let _ = write!(row, " {:4}", n);
        }

        Opcode::CallNamed => {
            let n = u8_operand!();
            let _ = write!(row, " {:4}", n);
            for _ in 0..n {
                let label = u16_operand!();
                if label == NO_LABEL {
                    let _ = write!(row, " _");
                } else {
                    let _ = write!(row, " '{}'", chunk.string_at(label as usize).unwrap_or("?"));
                }
            }
        }

        Opcode::Tuple => {
            let n = u8_operand!();
            let _ = write!(row, " {:4}", n);
            for _ in 0..n {
                let label = u16_operand!();
                if label == NO_LABEL {
                    let _ = write!(row, " _");
                } else {
                    let _ = write!(row, " '{}'", chunk.string_at(label as usize).unwrap_or("?"));
                }
            }
        }

        Opcode::StructMethod => {
            let idx = u16_operand!();
            let mutating = u8_operand!();
            let name = chunk.string_at(idx as usize).unwrap_or("<bad string>");
            let _ = write!(row, " {:4} '{}' mutating={}", idx, name, mutating != 0);
        }

        Opcode::DefineComputedProperty => {
            let idx = u16_operand!();
            let has_setter = u8_operand!();
            let name = chunk.string_at(idx as usize).unwrap_or("<bad string>");
            let _ = write!(row, " {:4} '{}' setter={}", idx, name, has_setter != 0);
        }

        Opcode::DefinePropertyWithObservers => {
            let idx = u16_operand!();
            let flags = u8_operand!();
            let name = chunk.string_at(idx as usize).unwrap_or("<bad string>");
            let _ = write!(
                row,
                " {:4} '{}' willSet={} didSet={}",
                idx,
                name,
                flags & 1 != 0,
                flags & 2 != 0
            );
        }

        Opcode::EnumCase => {
            let idx = u16_operand!();
            let label_count = u8_operand!();
            let name = chunk.string_at(idx as usize).unwrap_or("<bad string>");
            let _ = write!(row, " {:4} '{}'", idx, name);
            for _ in 0..label_count {
                let label = u16_operand!();
                let _ = write!(row, " '{}'", chunk.string_at(label as usize).unwrap_or("?"));
            }
            let has_raw = u8_operand!();
            let _ = write!(row, " raw={}", has_raw != 0);
        }

        Opcode::Protocol => {
            let idx = u16_operand!();
            let name = chunk
                .protocols
                .get(idx as usize)
                .map(|p| p.name.as_str())
                .unwrap_or("<bad protocol>");
            let _ = write!(row, " {:4} '{}'", idx, name);
        }

        Opcode::Try => {
            let jump = u16_operand!();
            let _ = write!(row, " {:4} -> {}", jump, cursor + jump as usize);
        }
    }

    (row, cursor)
}

/// Number of operand bytes following `op` at `offset` in `chunk`
///
/// Needed by tooling that walks the instruction stream without decoding.
pub fn operand_width(chunk: &Chunk, op: Opcode, offset: usize) -> usize {
    match op {
        Opcode::Const
        | Opcode::Call
        | Opcode::Array
        | Opcode::Dict
        | Opcode::GetTupleIndex
        | Opcode::GetAssociated => 1,

        Opcode::Str
        | Opcode::DefineGlobal
        | Opcode::GetGlobal
        | Opcode::SetGlobal
        | Opcode::GetLocal
        | Opcode::SetLocal
        | Opcode::Jump
        | Opcode::JumpIfFalse
        | Opcode::JumpIfNil
        | Opcode::Loop
        | Opcode::Closure
        | Opcode::GetUpvalue
        | Opcode::SetUpvalue
        | Opcode::Class
        | Opcode::Method
        | Opcode::DefineProperty
        | Opcode::GetProperty
        | Opcode::SetProperty
        | Opcode::Super
        | Opcode::OptionalChain
        | Opcode::GetTupleLabel
        | Opcode::Struct
        | Opcode::Enum
        | Opcode::MatchEnumCase
        | Opcode::Protocol
        | Opcode::TypeCheck
        | Opcode::TypeCast
        | Opcode::TypeCastOptional
        | Opcode::TypeCastForced
        | Opcode::Try => 2,

        Opcode::StructMethod | Opcode::DefineComputedProperty
        | Opcode::DefinePropertyWithObservers => 3,

        Opcode::CallNamed | Opcode::Tuple => {
            let n = chunk.code.get(offset + 1).copied().unwrap_or(0) as usize;
            1 + n * 2
        }

        Opcode::EnumCase => {
            let n = chunk.code.get(offset + 3).copied().unwrap_or(0) as usize;
            // name(2) + count(1) + labels(2n) + has_raw(1)
            4 + n * 2
        }

        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Constant;

    #[test]
    fn test_simple_listing() {
        let mut chunk = Chunk::new();
        let k = chunk.add_constant(Constant::Int(7)) as u8;
        chunk.write_op(Opcode::Const, 1);
        chunk.write(k, 1);
        chunk.write_op(Opcode::Print, 1);
        chunk.write_op(Opcode::Halt, 2);

        let listing = disassemble(&chunk, "main");
        assert!(listing.contains("== main =="));
        assert!(listing.contains("CONST"));
        assert!(listing.contains("(7)"));
        assert!(listing.contains("PRINT"));
        assert!(listing.contains("HALT"));
    }

    #[test]
    fn test_same_line_marker() {
        let mut chunk = Chunk::new();
        chunk.write_op(Opcode::Nil, 5);
        chunk.write_op(Opcode::Pop, 5);

        let (first, next) = disassemble_instruction(&chunk, 0);
        assert!(first.contains("   5"));
        let (second, _) = disassemble_instruction(&chunk, next);
        assert!(second.contains('|'));
    }

    #[test]
    fn test_jump_target_rendering() {
        let mut chunk = Chunk::new();
        chunk.write_op(Opcode::JumpIfFalse, 1);
        chunk.write_u16(4, 1);
        chunk.write_op(Opcode::Nil, 1);

        let (row, next) = disassemble_instruction(&chunk, 0);
        assert_eq!(next, 3);
        assert!(row.contains("-> 7"));
    }

    #[test]
    fn test_string_operand_rendering() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_string("answer") as u16;
        chunk.write_op(Opcode::GetGlobal, 1);
        chunk.write_u16(idx, 1);

        let (row, next) = disassemble_instruction(&chunk, 0);
        assert_eq!(next, 3);
        assert!(row.contains("'answer'"));
    }

    #[test]
    fn test_operand_width_variable_instructions() {
        let mut chunk = Chunk::new();
        chunk.write_op(Opcode::CallNamed, 1);
        chunk.write(2, 1);
        chunk.write_u16(0, 1);
        chunk.write_u16(NO_LABEL, 1);

        assert_eq!(operand_width(&chunk, Opcode::CallNamed, 0), 5);
        assert_eq!(operand_width(&chunk, Opcode::Call, 0), 1);
        assert_eq!(operand_width(&chunk, Opcode::Halt, 0), 0);
    }
}
