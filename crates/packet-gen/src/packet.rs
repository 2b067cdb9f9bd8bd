use std::collections::BTreeSet;
use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::trace;

use crate::descriptor::{InstructionSet, ATTR_MUST_EXTEND, ATTR_SOLO};
use crate::error::{EmptyUniverse, GenerationExhausted};
use crate::mem;
use crate::operand::OperandSynthesizer;

/// Architectural limit on instruction words in one packet.
pub const MAX_PACKET_SLOTS: usize = 4;

/// Optional packet attribute allowing two stores/loads to be reordered freely.
pub const ATTR_MEM_NOSHUF: &str = "mem_noshuf";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotKey {
    Tag(String),
    /// Injected memory access, numbered from 1.
    SynthMem(usize),
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKey::Tag(tag) => f.write_str(tag),
            SlotKey::SynthMem(1) => f.write_str("synth_mem"),
            SlotKey::SynthMem(n) => write!(f, "synth_mem{n}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketSlot {
    pub key: SlotKey,
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    /// Setup that runs right before the packet.
    pub pre: Vec<String>,
    pub slots: Vec<PacketSlot>,
    /// Tags in the order they were drawn, repeats included.
    pub source_tags: Vec<String>,
    /// Attributes the assembler may append to the closing brace.
    pub optional_attrs: BTreeSet<String>,
}

impl Packet {
    pub fn instructions(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|slot| slot.text.as_str())
    }

    pub fn synthesized_accesses(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.key, SlotKey::SynthMem(_)))
            .count()
    }
}

pub struct PacketGenerator<'a> {
    iset: &'a InstructionSet,
    universe: Vec<&'a str>,
    max_insts: usize,
    operands: OperandSynthesizer,
}

impl<'a> PacketGenerator<'a> {
    /// `tags` is the eligible universe; solo instructions are dropped from it here.
    pub fn new(
        iset: &'a InstructionSet,
        tags: &'a [String],
        max_insts: usize,
    ) -> Result<Self, EmptyUniverse> {
        let universe: Vec<&str> = tags
            .iter()
            .filter(|tag| {
                iset.get(tag)
                    .is_some_and(|inst| !inst.has_attr(ATTR_SOLO))
            })
            .map(String::as_str)
            .collect();
        if universe.is_empty() || max_insts == 0 {
            return Err(EmptyUniverse);
        }
        Ok(Self {
            iset,
            universe,
            max_insts,
            operands: OperandSynthesizer::new(),
        })
    }

    pub fn universe(&self) -> &[&'a str] {
        &self.universe
    }

    /// Draws one packet. Exhaustion leaves nothing behind; retry with the same RNG.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Packet, GenerationExhausted> {
        let count = rng.gen_range(1..=self.max_insts);
        let mut packet = Packet::default();
        let mut has_extender = false;
        // Setup contributed by each slot; a redrawn tag drops the setup of the slot it replaces.
        let mut slot_pre: Vec<Option<String>> = Vec::new();

        for _ in 0..count {
            let Some(&tag) = self.universe.choose(rng) else {
                break;
            };
            let Some(inst) = self.iset.get(tag) else {
                continue;
            };
            let populated = self.operands.populate(rng, inst);
            has_extender |=
                inst.has_attr(ATTR_MUST_EXTEND) || populated.text.contains("immext");

            let key = SlotKey::Tag(tag.to_string());
            match packet.slots.iter().position(|slot| slot.key == key) {
                Some(i) => {
                    packet.slots[i].text = populated.text;
                    slot_pre[i] = populated.pre;
                }
                None => {
                    packet.slots.push(PacketSlot {
                        key,
                        text: populated.text,
                    });
                    slot_pre.push(populated.pre);
                }
            }
            packet.source_tags.push(tag.to_string());
        }
        packet.pre = slot_pre.into_iter().flatten().collect();

        if rng.gen_bool(0.5) && packet.slots.len() < MAX_PACKET_SLOTS && !has_extender {
            self.inject_access(rng, &mut packet, 1)?;
            if packet.slots.len() < MAX_PACKET_SLOTS {
                self.inject_access(rng, &mut packet, 2)?;
            }
            if packet.synthesized_accesses() == 2 && rng.gen_bool(0.5) {
                packet.optional_attrs.insert(ATTR_MEM_NOSHUF.to_string());
            }
        }

        Ok(packet)
    }

    fn inject_access<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        packet: &mut Packet,
        n: usize,
    ) -> Result<(), GenerationExhausted> {
        let insts: Vec<&str> = packet.instructions().collect();
        let access = mem::synthesize(rng, &packet.pre, &insts)?;
        packet.pre.extend(access.pre);
        packet.slots.push(PacketSlot {
            key: SlotKey::SynthMem(n),
            text: access.text,
        });
        Ok(())
    }

    /// Generates `count` packets, regenerating any packet that hit a dead end.
    pub fn generate_set<R: Rng + ?Sized>(&self, rng: &mut R, count: usize) -> Vec<Packet> {
        let mut packets = Vec::with_capacity(count);
        while packets.len() < count {
            match self.generate(rng) {
                Ok(packet) => packets.push(packet),
                Err(err) => trace!(%err, "discarding packet"),
            }
        }
        packets
    }
}
