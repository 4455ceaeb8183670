//! Property Dispatch Tests
//!
//! End-to-end reads and writes through inline-cached call sites:
//! - Shape transitions and type widening
//! - Prototype lookups and accessors
//! - Scope semantics for `let`/`const` and undeclared assignments

use marten_vm_core::key::PropertyKey;
use marten_vm_core::runtime::VmRuntime;
use marten_vm_core::value::{JsFunction, Value};
use marten_vm_core::{
    CallSiteDescriptor, CallSiteFlags, PropertyError, PropertyFlags, VmContext, ValueType,
};
use std::sync::Arc;

fn create_test_context() -> (VmContext, VmRuntime) {
    let runtime = VmRuntime::new();
    let ctx = runtime.create_context();
    (ctx, runtime)
}

fn key(name: &str) -> PropertyKey {
    PropertyKey::from(name)
}

fn scope_desc(name: &str, ty: ValueType, flags: CallSiteFlags) -> CallSiteDescriptor {
    CallSiteDescriptor::new(name, ty).with_flags(CallSiteFlags::SCOPE | flags)
}

// ============================================================================
// Shapes and widening
// ============================================================================

#[test]
fn test_same_root_different_types_yield_independent_shapes() {
    let (ctx, _rt) = create_test_context();
    let a = ctx.new_object();
    let b = ctx.new_object();
    let root = a.shape();
    assert!(Arc::ptr_eq(&root, &b.shape()));

    let int_site = ctx.set_site(CallSiteDescriptor::new("a", ValueType::Int));
    let object_site = ctx.set_site(CallSiteDescriptor::new("a", ValueType::Object));
    int_site.set(&a, Value::int32(1)).unwrap();
    object_site.set(&b, Value::string("one")).unwrap();

    assert!(!Arc::ptr_eq(&a.shape(), &b.shape()));
    assert_eq!(root.size(), 0);
    assert_eq!(a.shape().find(&key("a")).unwrap().current_type(), ValueType::Int);
    assert_eq!(b.shape().find(&key("a")).unwrap().current_type(), ValueType::Object);

    let read = ctx.get_site(CallSiteDescriptor::new("a", ValueType::Int));
    assert_eq!(read.get(&a).unwrap(), Value::int32(1));
    assert_eq!(read.get(&a).unwrap(), Value::int32(1));
    assert_eq!(read.stats().hits, 1);
    assert_eq!(b.get(&key("a")).unwrap(), Value::string("one"));
}

#[test]
fn test_widening_is_monotonic() {
    let (ctx, _rt) = create_test_context();
    let obj = ctx.new_object();
    let v = key("v");
    let type_of = |obj: &marten_vm_core::ObjectRef| obj.shape().find(&v).unwrap().current_type();

    obj.set(&v, Value::int32(1), false).unwrap();
    assert_eq!(type_of(&obj), ValueType::Int);
    obj.set(&v, Value::number(2.5), false).unwrap();
    assert_eq!(type_of(&obj), ValueType::Double);
    assert_eq!(obj.get(&v).unwrap(), Value::number(2.5));
    obj.set(&v, Value::string("s"), false).unwrap();
    assert_eq!(type_of(&obj), ValueType::Object);

    obj.set(&v, Value::int32(3), false).unwrap();
    assert_eq!(type_of(&obj), ValueType::Object);
    assert_eq!(obj.get(&v).unwrap(), Value::int32(3));
}

#[test]
fn test_int_site_relinks_after_widening() {
    let (ctx, _rt) = create_test_context();
    let obj = ctx.new_object();
    obj.set(&key("n"), Value::int32(10), false).unwrap();

    let read = ctx.get_site(CallSiteDescriptor::new("n", ValueType::Object));
    assert_eq!(read.get(&obj).unwrap(), Value::int32(10));
    obj.set(&key("n"), Value::number(0.5), false).unwrap();
    assert_eq!(read.get(&obj).unwrap(), Value::number(0.5));
    assert_eq!(read.stats().misses, 2);
}

// ============================================================================
// Prototypes and accessors
// ============================================================================

#[test]
fn test_inherited_accessor_binds_receiver() {
    let (ctx, _rt) = create_test_context();
    let proto = ctx.new_object();
    proto
        .define_accessor(
            &key("self"),
            Some(JsFunction::new("get self", |this, _| Ok(this.clone()))),
            None,
            PropertyFlags::empty(),
        )
        .unwrap();
    let obj = ctx.new_object_with_proto(Some(proto));

    let read = ctx.get_site(CallSiteDescriptor::new("self", ValueType::Object));
    let value = read.get(&obj).unwrap();
    assert!(value.as_object().is_some_and(|o| Arc::ptr_eq(o, &obj)));
}

#[test]
fn test_strict_write_without_setter() {
    let (ctx, _rt) = create_test_context();
    let obj = ctx.new_object();
    obj.define_accessor(
        &key("ro"),
        Some(JsFunction::new("get ro", |_, _| Ok(Value::int32(1)))),
        None,
        PropertyFlags::empty(),
    )
    .unwrap();

    let sloppy = ctx.set_site(CallSiteDescriptor::new("ro", ValueType::Object));
    sloppy.set(&obj, Value::int32(2)).unwrap();
    assert_eq!(obj.get(&key("ro")).unwrap(), Value::int32(1));

    let strict = ctx.set_site(
        CallSiteDescriptor::new("ro", ValueType::Object).with_flags(CallSiteFlags::STRICT),
    );
    assert!(matches!(
        strict.set(&obj, Value::int32(2)),
        Err(PropertyError::NoSetter(_))
    ));
}

#[test]
fn test_prototype_change_relinks_read() {
    let (ctx, _rt) = create_test_context();
    let first = ctx.new_object();
    first.set(&key("p"), Value::int32(1), false).unwrap();
    let second = ctx.new_object();
    second.set(&key("p"), Value::int32(2), false).unwrap();
    let obj = ctx.new_object_with_proto(Some(first));

    let read = ctx.get_site(CallSiteDescriptor::new("p", ValueType::Int));
    assert_eq!(read.get(&obj).unwrap(), Value::int32(1));
    obj.set_prototype_of(Some(second)).unwrap();
    assert_eq!(read.get(&obj).unwrap(), Value::int32(2));
}

#[test]
fn test_same_shape_different_prototypes_relink() {
    let (ctx, _rt) = create_test_context();
    let with_x = ctx.new_object();
    with_x.set(&key("x"), Value::string("from proto"), false).unwrap();
    let without_x = ctx.new_object();
    without_x.set(&key("secret"), Value::string("hidden"), false).unwrap();
    let first = ctx.new_object_with_proto(Some(with_x));
    let second = ctx.new_object_with_proto(Some(without_x));
    assert!(Arc::ptr_eq(&first.shape(), &second.shape()));

    let read = ctx.get_site(CallSiteDescriptor::new("x", ValueType::Object));
    assert_eq!(read.get(&first).unwrap(), Value::string("from proto"));
    assert!(read.get(&second).unwrap().is_undefined());
    assert_eq!(read.get(&first).unwrap(), Value::string("from proto"));
    assert_eq!(read.stats().misses, 3);
}

#[test]
fn test_adding_site_checks_each_prototype() {
    let (ctx, _rt) = create_test_context();
    let open = ctx.new_object();
    let locked = ctx.new_object();
    locked
        .define_own_property(&key("k"), Value::int32(1), PropertyFlags::NOT_WRITABLE)
        .unwrap();
    let first = ctx.new_object_with_proto(Some(open));
    let second = ctx.new_object_with_proto(Some(locked));

    let desc = CallSiteDescriptor::new("k", ValueType::Int);
    let linked = ctx.linker().find_set_method(&first, &desc).unwrap();
    assert!(linked.is_valid_for(&first));
    assert!(!linked.is_valid_for(&second));

    let write = ctx.set_site(desc);
    write.set(&first, Value::int32(5)).unwrap();
    write.set(&second, Value::int32(5)).unwrap();
    assert_eq!(first.get(&key("k")).unwrap(), Value::int32(5));
    assert!(second.own_keys().is_empty());
    assert_eq!(second.get(&key("k")).unwrap(), Value::int32(1));
}

#[test]
fn test_inherited_read_only_blocks_sloppy_write() {
    let (ctx, _rt) = create_test_context();
    let proto = ctx.new_object();
    proto
        .define_own_property(&key("k"), Value::int32(1), PropertyFlags::NOT_WRITABLE)
        .unwrap();
    let obj = ctx.new_object_with_proto(Some(proto));

    let write = ctx.set_site(CallSiteDescriptor::new("k", ValueType::Int));
    write.set(&obj, Value::int32(9)).unwrap();
    assert!(obj.own_keys().is_empty());
    assert_eq!(obj.get(&key("k")).unwrap(), Value::int32(1));
}

// ============================================================================
// Scope semantics
// ============================================================================

#[test]
fn test_const_declaration_lifecycle() {
    let (ctx, _rt) = create_test_context();
    ctx.global().declare_lexical(&key("c"), true).unwrap();

    let read = ctx.get_site(scope_desc("c", ValueType::Object, CallSiteFlags::empty()));
    assert!(matches!(
        read.get(ctx.global()),
        Err(PropertyError::UndeclaredBinding(_))
    ));

    let declare = ctx.set_site(scope_desc("c", ValueType::Int, CallSiteFlags::DECLARE));
    declare.set(ctx.global(), Value::int32(5)).unwrap();
    assert_eq!(read.get(ctx.global()).unwrap(), Value::int32(5));

    let assign = ctx.set_site(scope_desc("c", ValueType::Int, CallSiteFlags::empty()));
    let err = assign.set(ctx.global(), Value::int32(6)).unwrap_err();
    assert!(err.is_type_error());
    assert_eq!(read.get(ctx.global()).unwrap(), Value::int32(5));
}

#[test]
fn test_let_declaration_then_assignment() {
    let (ctx, _rt) = create_test_context();
    let scope = ctx.new_scope(None);
    scope.declare_lexical(&key("l"), false).unwrap();

    let assign = ctx.set_site(scope_desc("l", ValueType::Int, CallSiteFlags::empty()));
    assert!(matches!(
        assign.set(&scope, Value::int32(1)),
        Err(PropertyError::UndeclaredBinding(_))
    ));

    let declare = ctx.set_site(scope_desc("l", ValueType::Int, CallSiteFlags::DECLARE));
    declare.set(&scope, Value::int32(1)).unwrap();
    assign.set(&scope, Value::int32(2)).unwrap();
    assert_eq!(scope.get(&key("l")).unwrap(), Value::int32(2));
    assert!(!ctx.global().has_property(&key("l")));
}

#[test]
fn test_undeclared_assignment_from_scope() {
    let (ctx, _rt) = create_test_context();
    let scope = ctx.new_scope(None);

    let strict = ctx.set_site(scope_desc("u", ValueType::Int, CallSiteFlags::STRICT));
    let err = strict.set(&scope, Value::int32(1)).unwrap_err();
    assert!(matches!(err, PropertyError::StrictAssignmentToUndeclared(_)));
    assert!(err.is_reference_error());

    let sloppy = ctx.set_site(scope_desc("u", ValueType::Int, CallSiteFlags::empty()));
    sloppy.set(&scope, Value::int32(1)).unwrap();
    assert!(scope.own_keys().is_empty());
    assert_eq!(ctx.global().get(&key("u")).unwrap(), Value::int32(1));
}

#[test]
fn test_global_binding_created_when_setter_runs() {
    let (ctx, _rt) = create_test_context();
    let outer = ctx.new_scope(None);
    outer.declare_lexical(&key("v"), false).unwrap();
    outer
        .set_with_flags(&key("v"), Value::int32(0), CallSiteFlags::SCOPE | CallSiteFlags::DECLARE)
        .unwrap();
    let top = ctx.new_scope(None);
    let inner = ctx.new_scope(Some(&outer));

    let desc = scope_desc("v", ValueType::Int, CallSiteFlags::empty());
    let linked = ctx.linker().find_set_method(&top, &desc).unwrap();
    assert!(!ctx.global().has_property(&key("v")));
    // Same empty scope shape, but `inner` resolves `v` in `outer`.
    assert!(linked.is_valid_for(&top));
    assert!(!linked.is_valid_for(&inner));

    linked.invocation().invoke(&top, Value::int32(1)).unwrap();
    assert!(top.own_keys().is_empty());
    assert_eq!(ctx.global().get(&key("v")).unwrap(), Value::int32(1));

    let write = ctx.set_site(desc);
    write.set(&inner, Value::int32(2)).unwrap();
    assert_eq!(outer.get(&key("v")).unwrap(), Value::int32(2));
    assert_eq!(ctx.global().get(&key("v")).unwrap(), Value::int32(1));
}

#[test]
fn test_missing_scope_read_is_reference_error() {
    let (ctx, _rt) = create_test_context();
    let scope = ctx.new_scope(None);
    let read = ctx.get_site(scope_desc("missing", ValueType::Object, CallSiteFlags::empty()));
    let err = read.get(&scope).unwrap_err();
    assert!(matches!(err, PropertyError::NotDefined(_)));
    assert!(err.is_reference_error());
}

// ============================================================================
// Extensibility
// ============================================================================

#[test]
fn test_non_extensible_object_rejects_additions() {
    let (ctx, _rt) = create_test_context();
    let obj = ctx.new_object();
    obj.set(&key("kept"), Value::int32(1), false).unwrap();
    obj.prevent_extensions();

    let sloppy = ctx.set_site(CallSiteDescriptor::new("added", ValueType::Int));
    sloppy.set(&obj, Value::int32(1)).unwrap();
    assert!(!obj.has_property(&key("added")));

    let strict = ctx.set_site(
        CallSiteDescriptor::new("added", ValueType::Int).with_flags(CallSiteFlags::STRICT),
    );
    assert!(matches!(
        strict.set(&obj, Value::int32(1)),
        Err(PropertyError::NonExtensibleWrite(_))
    ));

    let existing = ctx.set_site(CallSiteDescriptor::new("kept", ValueType::Int));
    existing.set(&obj, Value::int32(2)).unwrap();
    assert_eq!(obj.get(&key("kept")).unwrap(), Value::int32(2));
}

#[test]
fn test_frozen_object_ignores_sloppy_writes() {
    let (ctx, _rt) = create_test_context();
    let obj = ctx.new_object();
    obj.set(&key("f"), Value::int32(1), false).unwrap();
    obj.freeze();

    let write = ctx.set_site(CallSiteDescriptor::new("f", ValueType::Int));
    write.set(&obj, Value::int32(2)).unwrap();
    assert_eq!(obj.get(&key("f")).unwrap(), Value::int32(1));
    assert!(obj.is_frozen());
}

#[test]
fn test_undeclared_assignment_to_non_extensible_global() {
    let (ctx, _rt) = create_test_context();
    let scope = ctx.new_scope(None);
    ctx.global().prevent_extensions();

    scope
        .set_with_flags(&key("n"), Value::int32(1), CallSiteFlags::SCOPE)
        .unwrap();
    assert!(!ctx.global().has_property(&key("n")));

    let write = ctx.set_site(scope_desc("n", ValueType::Int, CallSiteFlags::empty()));
    write.set(&scope, Value::int32(2)).unwrap();
    assert!(!ctx.global().has_property(&key("n")));
    assert!(scope.own_keys().is_empty());
}
