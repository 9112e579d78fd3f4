// opcode.rs - The JVM operation set as it appears in the tree
//
// Short binary forms (`iload_0`, `ldc_w`, `goto_w`, ...) and the `wide` prefix
// never appear here; the disassembler folds them into the canonical operation
// and the assembler picks them again when encoding.

/// Operand layout of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// No operands
    Plain,
    /// One immediate int (`BIPUSH`, `SIPUSH`, `NEWARRAY`)
    Int,
    /// One local variable index
    Var,
    /// Local variable index and increment
    Iinc,
    /// One constant
    Ldc,
    /// One internal class name or array descriptor
    Type,
    /// Owner, name, descriptor
    Field,
    /// Owner, name, descriptor, optional interface flag
    Method,
    /// One label
    Jump,
    TableSwitch,
    LookupSwitch,
    MultiANewArray,
}

macro_rules! opcodes {
    ($($name:ident = $byte:literal => $shape:ident,)*) => {
        /// JVM operations (ASM-normalized)
        #[allow(non_camel_case_types, clippy::upper_case_acronyms)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($name = $byte,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name,)*];

            /// Canonical operation for a binary opcode byte
            pub fn from_byte(byte: u8) -> Option<Opcode> {
                match byte {
                    $($byte => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => stringify!($name),)*
                }
            }

            pub fn shape(self) -> Shape {
                match self {
                    $(Opcode::$name => Shape::$shape,)*
                }
            }
        }
    };
}

opcodes! {
    NOP = 0 => Plain,
    ACONST_NULL = 1 => Plain,
    ICONST_M1 = 2 => Plain,
    ICONST_0 = 3 => Plain,
    ICONST_1 = 4 => Plain,
    ICONST_2 = 5 => Plain,
    ICONST_3 = 6 => Plain,
    ICONST_4 = 7 => Plain,
    ICONST_5 = 8 => Plain,
    LCONST_0 = 9 => Plain,
    LCONST_1 = 10 => Plain,
    FCONST_0 = 11 => Plain,
    FCONST_1 = 12 => Plain,
    FCONST_2 = 13 => Plain,
    DCONST_0 = 14 => Plain,
    DCONST_1 = 15 => Plain,
    BIPUSH = 16 => Int,
    SIPUSH = 17 => Int,
    LDC = 18 => Ldc,
    ILOAD = 21 => Var,
    LLOAD = 22 => Var,
    FLOAD = 23 => Var,
    DLOAD = 24 => Var,
    ALOAD = 25 => Var,
    IALOAD = 46 => Plain,
    LALOAD = 47 => Plain,
    FALOAD = 48 => Plain,
    DALOAD = 49 => Plain,
    AALOAD = 50 => Plain,
    BALOAD = 51 => Plain,
    CALOAD = 52 => Plain,
    SALOAD = 53 => Plain,
    ISTORE = 54 => Var,
    LSTORE = 55 => Var,
    FSTORE = 56 => Var,
    DSTORE = 57 => Var,
    ASTORE = 58 => Var,
    IASTORE = 79 => Plain,
    LASTORE = 80 => Plain,
    FASTORE = 81 => Plain,
    DASTORE = 82 => Plain,
    AASTORE = 83 => Plain,
    BASTORE = 84 => Plain,
    CASTORE = 85 => Plain,
    SASTORE = 86 => Plain,
    POP = 87 => Plain,
    POP2 = 88 => Plain,
    DUP = 89 => Plain,
    DUP_X1 = 90 => Plain,
    DUP_X2 = 91 => Plain,
    DUP2 = 92 => Plain,
    DUP2_X1 = 93 => Plain,
    DUP2_X2 = 94 => Plain,
    SWAP = 95 => Plain,
    IADD = 96 => Plain,
    LADD = 97 => Plain,
    FADD = 98 => Plain,
    DADD = 99 => Plain,
    ISUB = 100 => Plain,
    LSUB = 101 => Plain,
    FSUB = 102 => Plain,
    DSUB = 103 => Plain,
    IMUL = 104 => Plain,
    LMUL = 105 => Plain,
    FMUL = 106 => Plain,
    DMUL = 107 => Plain,
    IDIV = 108 => Plain,
    LDIV = 109 => Plain,
    FDIV = 110 => Plain,
    DDIV = 111 => Plain,
    IREM = 112 => Plain,
    LREM = 113 => Plain,
    FREM = 114 => Plain,
    DREM = 115 => Plain,
    INEG = 116 => Plain,
    LNEG = 117 => Plain,
    FNEG = 118 => Plain,
    DNEG = 119 => Plain,
    ISHL = 120 => Plain,
    LSHL = 121 => Plain,
    ISHR = 122 => Plain,
    LSHR = 123 => Plain,
    IUSHR = 124 => Plain,
    LUSHR = 125 => Plain,
    IAND = 126 => Plain,
    LAND = 127 => Plain,
    IOR = 128 => Plain,
    LOR = 129 => Plain,
    IXOR = 130 => Plain,
    LXOR = 131 => Plain,
    IINC = 132 => Iinc,
    I2L = 133 => Plain,
    I2F = 134 => Plain,
    I2D = 135 => Plain,
    L2I = 136 => Plain,
    L2F = 137 => Plain,
    L2D = 138 => Plain,
    F2I = 139 => Plain,
    F2L = 140 => Plain,
    F2D = 141 => Plain,
    D2I = 142 => Plain,
    D2L = 143 => Plain,
    D2F = 144 => Plain,
    I2B = 145 => Plain,
    I2C = 146 => Plain,
    I2S = 147 => Plain,
    LCMP = 148 => Plain,
    FCMPL = 149 => Plain,
    FCMPG = 150 => Plain,
    DCMPL = 151 => Plain,
    DCMPG = 152 => Plain,
    IFEQ = 153 => Jump,
    IFNE = 154 => Jump,
    IFLT = 155 => Jump,
    IFGE = 156 => Jump,
    IFGT = 157 => Jump,
    IFLE = 158 => Jump,
    IF_ICMPEQ = 159 => Jump,
    IF_ICMPNE = 160 => Jump,
    IF_ICMPLT = 161 => Jump,
    IF_ICMPGE = 162 => Jump,
    IF_ICMPGT = 163 => Jump,
    IF_ICMPLE = 164 => Jump,
    IF_ACMPEQ = 165 => Jump,
    IF_ACMPNE = 166 => Jump,
    GOTO = 167 => Jump,
    JSR = 168 => Jump,
    RET = 169 => Var,
    TABLESWITCH = 170 => TableSwitch,
    LOOKUPSWITCH = 171 => LookupSwitch,
    IRETURN = 172 => Plain,
    LRETURN = 173 => Plain,
    FRETURN = 174 => Plain,
    DRETURN = 175 => Plain,
    ARETURN = 176 => Plain,
    RETURN = 177 => Plain,
    GETSTATIC = 178 => Field,
    PUTSTATIC = 179 => Field,
    GETFIELD = 180 => Field,
    PUTFIELD = 181 => Field,
    INVOKEVIRTUAL = 182 => Method,
    INVOKESPECIAL = 183 => Method,
    INVOKESTATIC = 184 => Method,
    INVOKEINTERFACE = 185 => Method,
    NEW = 187 => Type,
    NEWARRAY = 188 => Int,
    ANEWARRAY = 189 => Type,
    ARRAYLENGTH = 190 => Plain,
    ATHROW = 191 => Plain,
    CHECKCAST = 192 => Type,
    INSTANCEOF = 193 => Type,
    MONITORENTER = 194 => Plain,
    MONITOREXIT = 195 => Plain,
    MULTIANEWARRAY = 197 => MultiANewArray,
    IFNULL = 198 => Jump,
    IFNONNULL = 199 => Jump,
}

impl Opcode {
    /// Look an operation up by its mnemonic (`"INVOKESPECIAL"`)
    pub fn from_mnemonic(mnemonic: &str) -> Option<Opcode> {
        Opcode::ALL.iter().copied().find(|op| op.mnemonic() == mnemonic)
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Is this a conditional branch?
    pub fn is_branch(self) -> bool {
        matches!(self as u8, 153..=166 | 198 | 199)
    }

    /// Is this an unconditional jump (`GOTO`, `JSR`)?
    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::GOTO | Opcode::JSR)
    }

    pub fn is_switch(self) -> bool {
        matches!(self, Opcode::TABLESWITCH | Opcode::LOOKUPSWITCH)
    }

    pub fn is_return(self) -> bool {
        matches!(self as u8, 172..=177)
    }

    /// Is this a terminator (ends basic block)?
    pub fn is_terminator(self) -> bool {
        self.is_branch()
            || self.is_jump()
            || self.is_switch()
            || self.is_return()
            || matches!(self, Opcode::ATHROW | Opcode::RET)
    }

    /// Can control reach the next instruction in sequence?
    ///
    /// `JSR` counts as falling through: the subroutine returns there.
    pub fn falls_through(self) -> bool {
        !(self.is_return()
            || self.is_switch()
            || matches!(self, Opcode::GOTO | Opcode::ATHROW | Opcode::RET))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_roundtrip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_byte(op.byte()), Some(*op));
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(*op));
        }
    }

    #[test]
    fn test_short_forms_are_not_operations() {
        // iload_0, ldc_w, ldc2_w, invokedynamic, wide, goto_w
        for byte in [26u8, 19, 20, 186, 196, 200] {
            assert_eq!(Opcode::from_byte(byte), None);
        }
    }

    #[test]
    fn test_predicates() {
        assert!(Opcode::IFNULL.is_branch());
        assert!(Opcode::GOTO.is_terminator());
        assert!(!Opcode::GOTO.falls_through());
        assert!(Opcode::JSR.falls_through());
        assert!(Opcode::IFEQ.falls_through());
        assert!(Opcode::ARETURN.is_return());
        assert_eq!(Opcode::INVOKESPECIAL.shape(), Shape::Method);
        assert_eq!(Opcode::NEW.mnemonic(), "NEW");
    }
}
