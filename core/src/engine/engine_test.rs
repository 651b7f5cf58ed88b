use std::sync::Arc;

use super::*;
use crate::collection::CollectionMode;
use crate::exec::ExecutionState;
use crate::group::{Group, GroupCopyFlags};
use crate::host::{GroupRegistry, MapResolver, NullResolver};
use crate::instr::{BindSource, Instruction, Op, PointerSpec};
use crate::val::{DefaultValueProvider, Val};

fn s(x: &str) -> Arc<str> {
    Arc::from(x)
}

fn program(ops: Vec<Op>) -> ExecutionState {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    ExecutionState::new(Group::new(
        "main",
        ops.into_iter().map(Instruction::new).collect(),
    ))
}

fn run_in(
    state: &mut ExecutionState,
    resolver: &dyn PointerResolver,
    registry: &GroupRegistry,
) -> Result<()> {
    Engine::new(&DefaultValueProvider, resolver, registry).run(state)
}

fn run(state: &mut ExecutionState) -> Result<()> {
    run_in(state, &NullResolver, &GroupRegistry::new())
}

fn top(state: &ExecutionState) -> Val {
    state
        .frame()
        .unwrap()
        .registers
        .last()
        .expect("operand stack is empty")
        .value()
}

#[test]
fn push_and_add() {
    let mut state = program(vec![
        Op::PushValue { value: Val::Int(1) },
        Op::PushValue { value: Val::Int(2) },
        Op::Add,
        Op::Halt,
    ]);
    run(&mut state).unwrap();
    assert_eq!(top(&state), Val::Int(3));
}

#[test]
fn conditional_jump_requires_bool() {
    let mut state = program(vec![
        Op::PushValue { value: Val::Int(1) },
        Op::JumpIf { target: 0 },
    ]);
    let err = run(&mut state).unwrap_err();
    assert_eq!(err.to_string(), "Invalid value for condition");
}

#[test]
fn iterative_fibonacci() {
    // acc=0, a=0, b=1; while i < 44 { acc=acc+b; t=a+b; a=b; b=t; i=i+1 }
    // accumulates F(1)..F(44), so acc ends at F(46) - 1 = 1836311902.
    let mut state = program(vec![
        Op::BindStack { identifier: s("acc"), source: BindSource::Value(Val::Int(0)) },
        Op::BindStack { identifier: s("a"), source: BindSource::Value(Val::Int(0)) },
        Op::BindStack { identifier: s("b"), source: BindSource::Value(Val::Int(1)) },
        Op::BindStack { identifier: s("i"), source: BindSource::Value(Val::Int(0)) },
        Op::BindStack { identifier: s("n"), source: BindSource::Value(Val::Int(44)) },
        Op::BindStack { identifier: s("t"), source: BindSource::Value(Val::Int(0)) },
        Op::LoopBegin,                                                   // 6
        Op::LoadStack { identifier: s("i") },
        Op::LoadStack { identifier: s("n") },
        Op::Lt,
        Op::JumpIfNot { target: 33 },
        Op::LoadStack { identifier: s("acc") },                          // 11
        Op::LoadStack { identifier: s("acc") },
        Op::LoadStack { identifier: s("b") },
        Op::Add,
        Op::Assign,                                                      // 15: acc = acc + b
        Op::LoadStack { identifier: s("t") },
        Op::LoadStack { identifier: s("a") },
        Op::LoadStack { identifier: s("b") },
        Op::Add,
        Op::Assign,                                                      // 20: t = a + b
        Op::LoadStack { identifier: s("a") },
        Op::LoadStack { identifier: s("b") },
        Op::Assign,                                                      // 23: a = b
        Op::LoadStack { identifier: s("b") },
        Op::LoadStack { identifier: s("t") },
        Op::Assign,                                                      // 26: b = t
        Op::LoadStack { identifier: s("i") },
        Op::LoadStack { identifier: s("i") },
        Op::PushValue { value: Val::Int(1) },
        Op::Add,
        Op::Assign,                                                      // 31: i = i + 1
        Op::LoopEnd { target: 6 },
        Op::LoadStack { identifier: s("acc") },                          // 33
        Op::Halt,
    ]);
    run(&mut state).unwrap();
    assert_eq!(top(&state), Val::Int(1_836_311_902));
}

#[test]
fn block_scoping_drops_inner_declarations() {
    let mut state = program(vec![
        Op::BindStack { identifier: s("x"), source: BindSource::Value(Val::Int(1)) },
        Op::BlockBegin,
        Op::BindStack { identifier: s("y"), source: BindSource::Value(Val::Int(2)) },
        Op::BlockEnd,
        Op::Halt,
    ]);
    run(&mut state).unwrap();
    let frame = state.frame().unwrap();
    assert!(frame.lookup_stack("x").is_some());
    assert!(frame.lookup_stack("y").is_none());
}

#[test]
fn closure_reads_capture_at_invoke_time() {
    let mut state = program(vec![
        Op::BindStack { identifier: s("x"), source: BindSource::Value(Val::Int(10)) },
        Op::NewAction { location: 3, name: s("get"), captures: vec![s("x")] },
        Op::Jump { target: 8 },
        Op::LoadStack { identifier: s("x") },                            // 3: body
        Op::PushValue { value: Val::Int(0) },
        Op::Add,
        Op::RegisterToBuffer { count: 1 },
        Op::ExitFrame { target: None },
        Op::Invoke,                                                      // 8
        Op::BufferToRegister,
        Op::Halt,
    ]);
    run(&mut state).unwrap();
    assert_eq!(top(&state), Val::Int(10));
}

#[test]
fn closure_mutates_captured_slot() {
    let mut state = program(vec![
        Op::BindStack { identifier: s("x"), source: BindSource::Value(Val::Int(1)) },
        Op::NewAction { location: 3, name: s("inc"), captures: vec![s("x")] },
        Op::Jump { target: 9 },
        Op::LoadStack { identifier: s("x") },                            // 3: body
        Op::LoadStack { identifier: s("x") },
        Op::PushValue { value: Val::Int(1) },
        Op::Add,
        Op::Assign,
        Op::ExitFrame { target: None },
        Op::Invoke,                                                      // 9
        Op::Halt,
    ]);
    run(&mut state).unwrap();
    let x = state.frame().unwrap().lookup_stack("x").unwrap();
    assert_eq!(x.value(), Val::Int(2));
}

#[test]
fn override_redirects_invocation() {
    let mut state = program(vec![
        Op::Jump { target: 9 },
        Op::PushValue { value: Val::Int(1) },                            // 1: body f
        Op::RegisterToBuffer { count: 1 },
        Op::ExitFrame { target: None },
        Op::Non,
        Op::PushValue { value: Val::Int(2) },                            // 5: body g
        Op::RegisterToBuffer { count: 1 },
        Op::ExitFrame { target: None },
        Op::Non,
        Op::NewAction { location: 1, name: s("f"), captures: vec![] },   // 9
        Op::NewAction { location: 5, name: s("g"), captures: vec![] },
        Op::OverrideAction { location: 1 },
        Op::Invoke,
        Op::BufferToRegister,
        Op::Halt,
    ]);
    run(&mut state).unwrap();
    assert_eq!(top(&state), Val::Int(2));
}

#[test]
fn execute_restricted_fails_and_consumes_the_operand() {
    let mut state = program(vec![
        Op::Jump { target: 3 },
        Op::ExitFrame { target: None },                                  // 1: body
        Op::Non,
        Op::NewAction { location: 1, name: s("f"), captures: vec![] },   // 3
        Op::BindStack { identifier: s("f"), source: BindSource::Pointer },
        Op::LoadStack { identifier: s("f") },
        Op::PushValue { value: Val::Int(2) },
        Op::SetModifiers,
        Op::LoadStack { identifier: s("f") },
        Op::Invoke,
    ]);
    let err = run(&mut state).unwrap_err();
    assert_eq!(err.to_string(), "Execution is not allowed");
    // Only the pointer left behind by the bind remains.
    assert_eq!(state.frame().unwrap().register_count(), 1);
}

#[test]
fn published_group_links_a_second_program() {
    let registry = GroupRegistry::new();

    let mut producer = program(vec![
        Op::GroupBegin { name: s("lib") },
        Op::BindGroup { identifier: s("answer"), source: BindSource::Value(Val::Int(42)) },
        Op::GroupEnd,
        Op::PublishGroup,
        Op::Halt,
    ]);
    run_in(&mut producer, &NullResolver, &registry).unwrap();

    let mut consumer = program(vec![
        Op::RetrieveGroup { name: s("lib") },
        Op::PushValue { value: Val::from("answer") },
        Op::GetKey { create: false },
        Op::Halt,
    ]);
    run_in(&mut consumer, &NullResolver, &registry).unwrap();
    assert_eq!(top(&consumer), Val::Int(42));
}

#[test]
fn dynamic_pointers_round_trip_through_the_resolver() {
    let resolver = MapResolver::new();
    let registry = GroupRegistry::new();

    let mut writer = program(vec![
        Op::BindDynamic { identifier: s("counter"), source: BindSource::Value(Val::Int(7)) },
        Op::LoadDynamic { identifier: s("counter") },
        Op::Halt,
    ]);
    run_in(&mut writer, &resolver, &registry).unwrap();
    assert_eq!(top(&writer), Val::Int(7));
    assert_eq!(resolver.get("counter").unwrap().value(), Val::Int(7));

    let mut eraser = program(vec![
        Op::LoadDynamic { identifier: s("counter") },
        Op::Undeclare,
        Op::Halt,
    ]);
    run_in(&mut eraser, &resolver, &registry).unwrap();
    assert!(resolver.get("counter").is_none());
}

#[test]
fn hybrid_collection_program() {
    let mut state = program(vec![
        Op::NewCollection { mode: CollectionMode::Hybrid },
        Op::BindStack { identifier: s("c"), source: BindSource::Register },
        Op::LoadStack { identifier: s("c") },
        Op::PushValue { value: Val::Int(0) },
        Op::GetKey { create: true },
        Op::PushValue { value: Val::from("a") },
        Op::Assign,
        Op::LoadStack { identifier: s("c") },
        Op::PushValue { value: Val::from("title") },
        Op::GetKey { create: true },
        Op::PushValue { value: Val::from("t") },
        Op::Assign,
        Op::LoadStack { identifier: s("c") },
        Op::Size,
        Op::Halt,
    ]);
    run(&mut state).unwrap();
    assert_eq!(top(&state), Val::Int(2));
    let c = match state.frame().unwrap().lookup_stack("c").unwrap().value() {
        Val::Collection(c) => c,
        other => panic!("expected collection, got {other:?}"),
    };
    assert!(c.is_map());
}

#[test]
fn merge_frame_exposes_caller_scope_to_the_callee() {
    let mut state = program(vec![
        Op::BindStack { identifier: s("v"), source: BindSource::Value(Val::Int(5)) },
        Op::EnterFrame { location: 3, frameless: false },
        Op::Halt,
        Op::MergeFrame { registers: false, stack: true, offset: 1 },     // 3: subroutine
        Op::LoadStack { identifier: s("v") },
        Op::LoadStack { identifier: s("v") },
        Op::PushValue { value: Val::Int(1) },
        Op::Add,
        Op::Assign,                                                      // v = v + 1
        Op::ExitFrame { target: None },
    ]);
    run(&mut state).unwrap();
    // The callee wrote through the merged alias into the caller's cell.
    let v = state.frame().unwrap().lookup_stack("v").unwrap();
    assert_eq!(v.value(), Val::Int(6));
}

#[test]
fn frameless_enter_is_a_jump() {
    let mut state = program(vec![
        Op::EnterFrame { location: 2, frameless: true },
        Op::PushValue { value: Val::Int(99) },
        Op::PushValue { value: Val::Int(1) },
        Op::Halt,
    ]);
    run(&mut state).unwrap();
    assert_eq!(state.frame_count(), 1);
    assert_eq!(state.frame().unwrap().register_count(), 1);
    assert_eq!(top(&state), Val::Int(1));
}

#[test]
fn exit_frame_honors_the_index_override() {
    let mut state = program(vec![
        Op::EnterFrame { location: 2, frameless: false },
        Op::Halt,
        Op::ExitFrame { target: Some(4) },                               // 2: subroutine
        Op::Non,
        Op::PushValue { value: Val::Int(8) },                            // 4
        Op::Halt,
    ]);
    run(&mut state).unwrap();
    assert_eq!(top(&state), Val::Int(8));
}

#[test]
fn run_with_respects_the_instruction_budget() {
    let mut state = program(vec![Op::Non, Op::Jump { target: 0 }]);
    let provider = DefaultValueProvider;
    let registry = GroupRegistry::new();
    let engine = Engine::new(&provider, &NullResolver, &registry);
    engine
        .run_with(&mut state, RunOptions { max_instructions: Some(10) })
        .unwrap();
    assert!(state.executable());
}

#[test]
fn budget_pauses_only_on_interruptible_instructions() {
    let protected = |op: Op| {
        let mut instruction = Instruction::new(op);
        instruction.interruptible = false;
        instruction
    };
    let mut state = ExecutionState::new(Group::new(
        "main",
        vec![
            Instruction::new(Op::Non),
            protected(Op::Non),
            protected(Op::Non),
            Instruction::new(Op::PushValue { value: Val::Int(1) }),
            Instruction::new(Op::Halt),
        ],
    ));
    let provider = DefaultValueProvider;
    let registry = GroupRegistry::new();
    let engine = Engine::new(&provider, &NullResolver, &registry);

    // The budget runs out after the first instruction, but the pause
    // slides past the protected span to the next interruptible one.
    engine
        .run_with(&mut state, RunOptions { max_instructions: Some(1) })
        .unwrap();
    assert!(state.executable());
    assert_eq!(state.instruction_index(), 3);
    assert_eq!(state.frame().unwrap().register_count(), 0);

    engine.run(&mut state).unwrap();
    assert_eq!(top(&state), Val::Int(1));
}

#[test]
fn failures_carry_the_source_position_when_present() {
    let mut state = ExecutionState::new(Group::new(
        "main",
        vec![
            Instruction::with_position(Op::Add, 3, 7),
            Instruction::new(Op::Halt),
        ],
    ));
    let err = run(&mut state).unwrap_err();
    assert_eq!(err.to_string(), "at 3:7");
    assert_eq!(err.root_cause().to_string(), "Operand stack is empty");
}

#[test]
fn definedness_is_observable() {
    let mut state = program(vec![
        Op::DeclareStack { identifier: s("x") },
        Op::LoadStack { identifier: s("x") },
        Op::IsDefined,
        Op::LoadStack { identifier: s("x") },
        Op::PushValue { value: Val::Int(5) },
        Op::Assign,
        Op::LoadStack { identifier: s("x") },
        Op::IsDefined,
        Op::Halt,
    ]);
    run(&mut state).unwrap();
    let frame = state.frame().unwrap();
    assert_eq!(frame.registers[0].value(), Val::Bool(false));
    assert_eq!(frame.registers[1].value(), Val::Bool(true));
}

#[test]
fn is_defined_on_an_empty_stack_is_false() {
    let mut state = program(vec![Op::IsDefined, Op::Halt]);
    run(&mut state).unwrap();
    assert_eq!(top(&state), Val::Bool(false));
}

#[test]
fn conditional_arms_share_an_end_jump() {
    let mut state = program(vec![
        Op::CondBegin,
        Op::PushValue { value: Val::Bool(true) },
        Op::JumpIfNot { target: 6 },
        Op::PushValue { value: Val::Int(1) },                            // then arm
        Op::CondEnd { target: 7 },
        Op::Non,
        Op::PushValue { value: Val::Int(2) },                            // 6: else arm
        Op::Halt,
    ]);
    run(&mut state).unwrap();
    assert_eq!(state.frame().unwrap().register_count(), 1);
    assert_eq!(top(&state), Val::Int(1));
}

#[test]
fn static_group_refuses_cloning() {
    let mut state = program(vec![
        Op::GroupBegin { name: s("g") },
        Op::GroupEnd,
        Op::BindStack { identifier: s("g"), source: BindSource::Register },
        Op::LoadStack { identifier: s("g") },
        Op::PushValue { value: Val::Int(1) },
        Op::SetModifiers,
        Op::LoadStack { identifier: s("g") },
        Op::CloneGroup { flags: GroupCopyFlags::NONE },
    ]);
    let err = run(&mut state).unwrap_err();
    assert_eq!(err.to_string(), "Cannot clone a static group");
}

#[test]
fn bulk_transfers_move_values_by_spec() {
    let mut state = program(vec![
        Op::BindStack { identifier: s("x"), source: BindSource::Value(Val::Int(1)) },
        Op::BindStack { identifier: s("y"), source: BindSource::Value(Val::Int(2)) },
        Op::BulkLoad { specs: vec![PointerSpec::Stack(s("x")), PointerSpec::Stack(s("y"))] },
        Op::BulkStore { specs: vec![PointerSpec::Stack(s("p")), PointerSpec::Stack(s("q"))] },
        Op::Halt,
    ]);
    run(&mut state).unwrap();
    let frame = state.frame().unwrap();
    assert_eq!(frame.lookup_stack("p").unwrap().value(), Val::Int(1));
    assert_eq!(frame.lookup_stack("q").unwrap().value(), Val::Int(2));
}

#[test]
fn bulk_load_of_unknown_identifier_fails() {
    let mut state = program(vec![Op::BulkLoad {
        specs: vec![PointerSpec::Stack(s("ghost"))],
    }]);
    let err = run(&mut state).unwrap_err();
    assert_eq!(err.to_string(), "Cannot resolve pointer: ghost");
}

#[test]
fn string_indexing_through_the_engine() {
    let mut state = program(vec![
        Op::PushValue { value: Val::from("abc") },
        Op::PushValue { value: Val::Int(1) },
        Op::GetIndex,
        Op::Halt,
    ]);
    run(&mut state).unwrap();
    assert_eq!(top(&state), Val::from("b"));
}

#[test]
fn operand_underflow_reports_an_empty_stack() {
    let mut state = program(vec![Op::Add]);
    let err = run(&mut state).unwrap_err();
    assert_eq!(err.to_string(), "Operand stack is empty");
}
