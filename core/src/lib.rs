//! Execution core of the loam bytecode virtual machine.
//!
//! The crate provides the instruction dispatch engine together with the
//! value and pointer models it operates on: a closed polymorphic value
//! enum, lifetime-tagged pointers over stack slots / closure slots /
//! collection entries, group (closure/object/namespace) state, and the
//! frame stack. A compiler front-end produces the instruction stream;
//! an embedding host supplies the value provider, the external pointer
//! resolver and the hosted-group registry.

pub mod collection;
pub mod engine;
pub mod exec;
pub mod group;
pub mod host;
pub mod instr;
pub mod ptr;
pub mod util;
pub mod val;

pub use collection::{Collection, CollectionMode, Key};
pub use engine::{Engine, RunOptions};
pub use exec::{ExecutionState, Frame};
pub use group::{ActionValue, Group, GroupCopyFlags, GroupMergeFlags, GroupRef};
pub use host::{GroupRegistry, MapResolver, NullResolver, PointerResolver, ResolveOp};
pub use instr::{BindSource, Instruction, Op, PointerSpec, SourcePosition};
pub use ptr::{Modifiers, Pointer, PointerKind, PointerLocation, PointerRef};
pub use val::{DefaultValueProvider, Val, ValueProvider};
