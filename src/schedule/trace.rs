//! Trace of schedule primitives with their recorded decisions.
//!
//! Every successful primitive appends one [`Instruction`]. Primitives that
//! resolve parameters on their own (the inferred factor of `split`) also store
//! the resolved values as a decision keyed by the instruction id, so that
//! replaying the trace reproduces the same program.

use crate::schedule::{BlockRV, LoopRV, Schedule};
use crate::utils::errors::{ScheduleError, ScheduleErrorKind, ScheduleResult};
use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Identifier of an instruction inside one trace.
pub type InstId = u32;

/// Identifier of a random variable inside one trace.
pub type RvId = u32;

/// Kind of a traced primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstKind {
    GetBlock,
    GetLoops,
    Split,
    Reorder,
    ComputeInline,
    ReverseComputeInline,
}

impl InstKind {
    pub fn name(&self) -> &'static str {
        match self {
            InstKind::GetBlock => "get_block",
            InstKind::GetLoops => "get_loops",
            InstKind::Split => "split",
            InstKind::Reorder => "reorder",
            InstKind::ComputeInline => "compute_inline",
            InstKind::ReverseComputeInline => "reverse_compute_inline",
        }
    }

    /// Pure instructions only look things up and may be dropped when their
    /// outputs are unused.
    pub fn is_pure(&self) -> bool {
        matches!(self, InstKind::GetBlock | InstKind::GetLoops)
    }
}

/// A random variable produced or consumed by an instruction.
///
/// Every output of every instruction is a fresh variable, even when two
/// lookups resolve to the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rv {
    Block(RvId),
    Loop(RvId),
}

impl Rv {
    pub fn id(&self) -> RvId {
        match self {
            Rv::Block(id) | Rv::Loop(id) => *id,
        }
    }
}

/// An instruction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstArg {
    Rv(Rv),
    Int(i64),
    None,
}

/// One traced primitive call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: InstId,
    pub kind: InstKind,
    pub inputs: Vec<InstArg>,
    /// Named string attributes, in call order
    pub attrs: Vec<(String, String)>,
    pub outputs: Vec<Rv>,
}

impl Instruction {
    fn input_rvs(&self) -> impl Iterator<Item = Rv> + '_ {
        self.inputs.iter().filter_map(|arg| match arg {
            InstArg::Rv(rv) => Some(*rv),
            _ => None,
        })
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Ordered instruction log plus decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    insts: Vec<Instruction>,
    decisions: BTreeMap<InstId, Vec<i64>>,
    next_id: InstId,
    next_rv: RvId,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instruction and return its id.
    pub fn append(
        &mut self,
        kind: InstKind,
        inputs: Vec<InstArg>,
        attrs: Vec<(String, String)>,
        outputs: Vec<Rv>,
    ) -> InstId {
        let id = self.next_id;
        self.next_id += 1;
        self.insts.push(Instruction { id, kind, inputs, attrs, outputs });
        id
    }

    /// A random variable id not used by any instruction so far.
    pub fn fresh_rv(&mut self) -> RvId {
        let id = self.next_rv;
        self.next_rv += 1;
        id
    }

    pub fn record_decision(&mut self, id: InstId, decision: Vec<i64>) {
        self.decisions.insert(id, decision);
    }

    pub fn insts(&self) -> &[Instruction] {
        &self.insts
    }

    pub fn decision(&self, id: InstId) -> Option<&[i64]> {
        self.decisions.get(&id).map(|d| d.as_slice())
    }

    pub fn decisions(&self) -> &BTreeMap<InstId, Vec<i64>> {
        &self.decisions
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Drop pure instructions whose outputs no later kept instruction uses.
    pub fn simplified(&self) -> Trace {
        let mut used: HashSet<Rv> = HashSet::new();
        let mut kept = Vec::new();
        for inst in self.insts.iter().rev() {
            let live = !inst.kind.is_pure() || inst.outputs.iter().any(|rv| used.contains(rv));
            if live {
                used.extend(inst.input_rvs());
                kept.push(inst.clone());
            }
        }
        kept.reverse();
        let decisions = kept
            .iter()
            .filter_map(|inst| self.decisions.get(&inst.id).map(|d| (inst.id, d.clone())))
            .collect();
        Trace { insts: kept, decisions, next_id: self.next_id, next_rv: self.next_rv }
    }

    /// Replay the trace on `sch`, reusing recorded decisions.
    pub fn apply_to_schedule(&self, sch: &mut Schedule) -> ScheduleResult<()> {
        let mut bound = Bindings::default();
        for inst in &self.insts {
            let produced = match inst.kind {
                InstKind::GetBlock => {
                    let name = inst.attr("name").ok_or_else(|| malformed(inst))?;
                    Produced::Blocks(vec![sch.get_block(name)?])
                }
                InstKind::GetLoops => Produced::Loops(sch.get_loops(bound.block(inst, 0)?)?),
                InstKind::Split => {
                    let loop_rv = bound.loop_rv(inst, 0)?;
                    let factors: Vec<Option<i64>> = match self.decision(inst.id) {
                        Some(decision) => decision.iter().map(|&f| Some(f)).collect(),
                        None => inst.inputs[1..]
                            .iter()
                            .map(|arg| match arg {
                                InstArg::Int(v) => Ok(Some(*v)),
                                InstArg::None => Ok(None),
                                InstArg::Rv(_) => Err(malformed(inst)),
                            })
                            .collect::<ScheduleResult<_>>()?,
                    };
                    Produced::Loops(sch.split(loop_rv, &factors)?)
                }
                InstKind::Reorder => {
                    let order = (0..inst.inputs.len())
                        .map(|i| bound.loop_rv(inst, i))
                        .collect::<ScheduleResult<Vec<_>>>()?;
                    sch.reorder(&order)?;
                    Produced::Loops(Vec::new())
                }
                InstKind::ComputeInline => {
                    sch.compute_inline(bound.block(inst, 0)?)?;
                    Produced::Loops(Vec::new())
                }
                InstKind::ReverseComputeInline => {
                    sch.reverse_compute_inline(bound.block(inst, 0)?)?;
                    Produced::Loops(Vec::new())
                }
            };
            bound.bind(inst, produced)?;
        }
        Ok(())
    }
}

/// Outputs of one replayed instruction.
enum Produced {
    Blocks(Vec<BlockRV>),
    Loops(Vec<LoopRV>),
}

/// Random variables of a recorded trace, bound to those of the schedule it
/// is replayed on.
#[derive(Default)]
struct Bindings {
    blocks: HashMap<RvId, BlockRV>,
    loops: HashMap<RvId, LoopRV>,
}

impl Bindings {
    fn block(&self, inst: &Instruction, index: usize) -> ScheduleResult<BlockRV> {
        match inst.inputs.get(index) {
            Some(InstArg::Rv(rv @ Rv::Block(id))) => self.blocks.get(id).copied().ok_or_else(|| undefined(rv)),
            _ => Err(malformed(inst)),
        }
    }

    fn loop_rv(&self, inst: &Instruction, index: usize) -> ScheduleResult<LoopRV> {
        match inst.inputs.get(index) {
            Some(InstArg::Rv(rv @ Rv::Loop(id))) => self.loops.get(id).copied().ok_or_else(|| undefined(rv)),
            _ => Err(malformed(inst)),
        }
    }

    fn bind(&mut self, inst: &Instruction, produced: Produced) -> ScheduleResult<()> {
        let count = match &produced {
            Produced::Blocks(b) => b.len(),
            Produced::Loops(l) => l.len(),
        };
        if count != inst.outputs.len() {
            return Err(malformed(inst));
        }
        match produced {
            Produced::Blocks(blocks) => {
                for (rv, block) in inst.outputs.iter().zip(blocks) {
                    match rv {
                        Rv::Block(id) => self.blocks.insert(*id, block),
                        Rv::Loop(_) => return Err(malformed(inst)),
                    };
                }
            }
            Produced::Loops(loops) => {
                for (rv, loop_rv) in inst.outputs.iter().zip(loops) {
                    match rv {
                        Rv::Loop(id) => self.loops.insert(*id, loop_rv),
                        Rv::Block(_) => return Err(malformed(inst)),
                    };
                }
            }
        }
        Ok(())
    }
}

fn undefined(rv: &Rv) -> ScheduleError {
    ScheduleError::new(
        ScheduleErrorKind::StaleHandle,
        "apply_to_schedule",
        format!("trace uses undefined random variable {}", rv.id()),
    )
}

fn malformed(inst: &Instruction) -> ScheduleError {
    ScheduleError::new(
        ScheduleErrorKind::NotFound,
        "apply_to_schedule",
        format!("instruction {} ({}) does not match the schedule", inst.id, inst.kind.name()),
    )
}

fn format_ints(values: &[i64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: HashMap<Rv, String> = HashMap::new();
        let mut counter = 0usize;
        let name_of = |names: &HashMap<Rv, String>, rv: &Rv| {
            names.get(rv).cloned().unwrap_or_else(|| format!("?{}", rv.id()))
        };
        for inst in &self.insts {
            let args: Vec<String> = inst
                .inputs
                .iter()
                .map(|arg| match arg {
                    InstArg::Rv(rv) => name_of(&names, rv),
                    InstArg::Int(v) => v.to_string(),
                    InstArg::None => "None".to_string(),
                })
                .collect();
            for rv in &inst.outputs {
                let prefix = match rv {
                    Rv::Block(_) => "b",
                    Rv::Loop(_) => "l",
                };
                names.insert(*rv, format!("{}{}", prefix, counter));
                counter += 1;
            }
            let lhs: Vec<String> = inst.outputs.iter().map(|rv| name_of(&names, rv)).collect();
            if !lhs.is_empty() {
                write!(f, "{} = ", lhs.join(", "))?;
            }
            let call = match inst.kind {
                InstKind::GetBlock => {
                    let attrs: Vec<String> =
                        inst.attrs.iter().map(|(k, v)| format!("{}=\"{}\"", k, v)).collect();
                    attrs.join(", ")
                }
                InstKind::GetLoops | InstKind::ComputeInline | InstKind::ReverseComputeInline => {
                    format!("block={}", args.first().map(String::as_str).unwrap_or(""))
                }
                InstKind::Split => {
                    let mut s = format!(
                        "loop={}, factors=[{}]",
                        args.first().map(String::as_str).unwrap_or(""),
                        args.get(1..).unwrap_or(&[]).join(", ")
                    );
                    if let Some(decision) = self.decisions.get(&inst.id) {
                        s.push_str(&format!(", decision={}", format_ints(decision)));
                    }
                    s
                }
                InstKind::Reorder => args.join(", "),
            };
            writeln!(f, "sch.{}({})", inst.kind.name(), call)?;
        }
        Ok(())
    }
}
