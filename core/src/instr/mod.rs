//! Instruction representation.
//!
//! `Op` is a closed enum with inline payloads; the engine dispatches on
//! it with one exhaustive match. Instructions carry an optional source
//! position for host-side diagnostics and an `interruptible` flag a
//! cooperative driver may honor between steps.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collection::CollectionMode;
use crate::group::{GroupCopyFlags, GroupMergeFlags};
use crate::val::Val;

/// Origin of the bound value for the pointer-creation family.
#[derive(Debug, Clone)]
pub enum BindSource {
    /// Inline literal.
    Value(Val),
    /// Pop a pointer and bind an alias of it.
    Pointer,
    /// Pop a pointer and bind a fresh cell holding its current value.
    Register,
}

/// Addressing form used by the bulk transfer instructions.
#[derive(Debug, Clone)]
pub enum PointerSpec {
    /// Named declared variable on the current frame.
    Stack(Arc<str>),
    /// Group pointer slot by index.
    GroupSlot(usize),
    /// Externally-resolved identifier.
    Dynamic(Arc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone)]
pub enum Op {
    // Markers. `Non` and the begin markers execute as no-ops; they exist
    // as stable jump landings and for the group/body capture scan.
    Non,
    LoopBegin,
    CondBegin,
    GroupEnd,

    // Control.
    Jump { target: usize },
    JumpIf { target: usize },
    JumpIfNot { target: usize },
    LoopEnd { target: usize },
    /// End of one conditional arm; jumps past the remaining arms.
    CondEnd { target: usize },
    Halt,

    // Frames and scopes.
    EnterFrame { location: usize, frameless: bool },
    ExitFrame { target: Option<usize> },
    GroupBegin { name: Arc<str> },
    FeedEnd,
    BlockBegin,
    BlockEnd,
    UnstackToOrigin { origin: usize },
    /// `offset` counts frames up from the current one; 1 is the
    /// immediate caller.
    MergeFrame { registers: bool, stack: bool, offset: usize },

    // Materialization.
    PushValue { value: Val },
    DeclareStack { identifier: Arc<str> },
    LoadStack { identifier: Arc<str> },
    LoadGroup { index: usize },
    LoadGroupNamed { name: Arc<str> },
    LoadDynamic { identifier: Arc<str> },
    RegisterToBuffer { count: usize },
    BufferToRegister,

    // Pointer creation and assignment.
    BindStack { identifier: Arc<str>, source: BindSource },
    BindGroup { identifier: Arc<str>, source: BindSource },
    BindDynamic { identifier: Arc<str>, source: BindSource },
    Assign,
    BulkLoad { specs: Vec<PointerSpec> },
    BulkStore { specs: Vec<PointerSpec> },

    // Arithmetic and logic.
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Neg,

    // Collections.
    NewCollection { mode: CollectionMode },
    GetKey { create: bool },
    GetIndex,
    Size,

    // Groups, actions, linking.
    CloneGroup { flags: GroupCopyFlags },
    MergeGroup { flags: GroupMergeFlags },
    AddDependency,
    LoadDependency { index: usize },
    PublishGroup,
    RetrieveGroup { name: Arc<str> },
    /// Create an action over the executing frame's group. Binding an
    /// action to another group is expressed by emitting this inside that
    /// group's body, between `GroupBegin` and `GroupEnd`.
    NewAction { location: usize, name: Arc<str>, captures: Vec<Arc<str>> },
    OverrideAction { location: usize },
    Invoke,
    GetModifiers,
    SetModifiers,

    // Definedness and teardown.
    IsDefined,
    Undeclare,
    ClearRegister,
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: Op,
    pub position: Option<SourcePosition>,
    pub interruptible: bool,
}

impl Instruction {
    pub fn new(op: Op) -> Instruction {
        Instruction {
            op,
            position: None,
            interruptible: true,
        }
    }

    pub fn with_position(op: Op, line: u32, column: u32) -> Instruction {
        Instruction {
            op,
            position: Some(SourcePosition { line, column }),
            interruptible: true,
        }
    }
}

impl From<Op> for Instruction {
    fn from(op: Op) -> Instruction {
        Instruction::new(op)
    }
}
