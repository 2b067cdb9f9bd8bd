//! Random instruction-packet synthesis for differential testing of Hexagon execution engines.
//!
//! The crate is pure: every random decision is drawn from an explicit [`rand::Rng`] passed in by
//! the caller, so a fixed seed and descriptor always produce the same program text.

pub mod descriptor;
pub mod error;
pub mod imm;
pub mod init;
pub mod mem;
pub mod mutate;
pub mod operand;
pub mod packet;
pub mod program;
pub mod regs;

pub use descriptor::{
    load_descriptor, parse_descriptor, InstructionDescriptor, InstructionSet, TagFilter,
};
pub use error::{DescriptorError, EmptyUniverse, GenerationExhausted, TemplateError};
pub use imm::{ImmediateRule, Signedness};
pub use mem::{AccessWidth, AddressingMode, MemoryAccess};
pub use mutate::MutationKind;
pub use operand::{OperandSynthesizer, PopulatedInstruction};
pub use packet::{Packet, PacketGenerator, PacketSlot, SlotKey};
pub use program::{
    ProgramSections, ProgramTemplate, DEFAULT_TEMPLATE, SECTION_NAMES, TEMPLATE_FILE_NAME,
};
pub use regs::RegisterClass;
