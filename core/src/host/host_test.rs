use std::sync::Arc;

use super::*;
use crate::group::Group;
use crate::ptr::Pointer;
use crate::val::{DefaultValueProvider, Val};

fn dummy_group() -> GroupRef {
    Group::new("host", Vec::new())
}

#[test]
fn null_resolver_always_fails() {
    let g = dummy_group();
    let err = NullResolver
        .resolve(&g, "anything", ResolveOp::Get, &DefaultValueProvider)
        .unwrap_err();
    assert_eq!(err.to_string(), "Cannot resolve pointer: anything");
}

#[test]
fn map_resolver_add_get_delete() {
    let g = dummy_group();
    let resolver = MapResolver::new();
    let provider = DefaultValueProvider;

    let err = resolver
        .resolve(&g, "x", ResolveOp::Get, &provider)
        .unwrap_err();
    assert_eq!(err.to_string(), "Cannot resolve pointer: x");

    let created = resolver.resolve(&g, "x", ResolveOp::Add, &provider).unwrap();
    assert!(created.is_dynamic());
    created.set_value(Val::Int(7)).unwrap();

    // Get is idempotent and returns the same cell.
    let fetched = resolver.resolve(&g, "x", ResolveOp::Get, &provider).unwrap();
    assert!(Arc::ptr_eq(&fetched, &created));
    assert_eq!(fetched.value(), Val::Int(7));

    // Add on an existing identifier does not reset it.
    let again = resolver.resolve(&g, "x", ResolveOp::Add, &provider).unwrap();
    assert_eq!(again.value(), Val::Int(7));

    resolver.resolve(&g, "x", ResolveOp::Delete, &provider).unwrap();
    assert!(resolver.get("x").is_none());
}

#[test]
fn map_resolver_accepts_host_seeded_slots() {
    let g = dummy_group();
    let resolver = MapResolver::new();
    resolver.insert("seeded", Pointer::plain(Val::from("hi")));
    let fetched = resolver
        .resolve(&g, "seeded", ResolveOp::Get, &DefaultValueProvider)
        .unwrap();
    assert_eq!(fetched.value(), Val::from("hi"));
}

#[test]
fn registry_publish_and_retrieve() {
    let registry = GroupRegistry::new();
    assert!(registry.is_empty());

    let g = Group::new("lib", Vec::new());
    registry.publish(g.clone());
    assert_eq!(registry.len(), 1);
    assert!(Arc::ptr_eq(&registry.retrieve("lib").unwrap(), &g));

    let err = registry.retrieve("missing").unwrap_err();
    assert_eq!(err.to_string(), "Group not found: missing");
}

#[test]
fn registry_republish_replaces() {
    let registry = GroupRegistry::new();
    let first = Group::new("lib", Vec::new());
    let second = Group::new("lib", Vec::new());
    registry.publish(first);
    registry.publish(second.clone());
    assert_eq!(registry.len(), 1);
    assert!(Arc::ptr_eq(&registry.retrieve("lib").unwrap(), &second));
}
