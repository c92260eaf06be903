//! End-to-end tests for message dispatch.
//!
//! Coverage:
//! - The four reference scenarios (bundle shadowing, overload scoring,
//!   required blocks, call-site retargeting)
//! - Cache properties: idempotence, invalidation, determinism
//! - Visibility, dual-level methods, undefine/alias/super
//! - Options bags, implicit conversion, implicit slots
//! - Concurrent table edits against a shared call site
//! - Manifest loading

use mosaic_core::{Block, ModuleId, Value, intern};
use mosaic_runtime::{
    BlockRequirement, ConversionStrategy, DispatchKind, ImplicitSlot, LookupRoot, Manifest, NativeOverload,
    OverloadDecl, Visibility,
};
use mosaic_vm::{
    CallSiteId, CallerContext, DispatchConfig, DispatchError, Dispatcher, ICClassification, Message,
};
use std::sync::Arc;

fn dispatcher() -> Dispatcher {
    Dispatcher::new(DispatchConfig::default()).unwrap()
}

fn configured(options: &[&str]) -> Dispatcher {
    Dispatcher::new(DispatchConfig::resolve(options, true).unwrap()).unwrap()
}

/// Zero-argument overload returning a fixed string.
fn says(text: &'static str) -> NativeOverload {
    NativeOverload::builder().build(move |_| Ok(Value::str(text))).unwrap()
}

fn define(d: &Dispatcher, owner: ModuleId, name: &str, overloads: Vec<NativeOverload>) {
    d.graph()
        .register_method(owner, intern(name), Visibility::Public, DispatchKind::InstanceLevel, overloads)
        .unwrap();
}

fn send(d: &Dispatcher, receiver: &Value, name: &str) -> Result<Value, DispatchError> {
    d.dispatch(&Message::new(receiver, name))
}

// =============================================================================
// Reference Scenarios
// =============================================================================

mod scenarios {
    use super::*;

    #[test]
    fn test_bundle_shadows_superclass_method() {
        let d = dispatcher();
        let animal = d.graph().define_type("Animal", None, &[]).unwrap();
        let loud = d.graph().define_bundle("Loud", &[]).unwrap();
        let dog = d.graph().define_type("Dog", Some(animal), &[loud]).unwrap();
        define(&d, animal, "speak", vec![says("...")]);
        define(&d, loud, "speak", vec![says("WOOF")]);

        assert_eq!(d.ancestors(dog), vec![dog, loud, animal, ModuleId::ROOT]);
        assert_eq!(d.method_owner(dog, "speak"), Some(loud));
        assert_eq!(send(&d, &Value::object(dog), "speak").unwrap(), Value::str("WOOF"));
        assert_eq!(send(&d, &Value::object(animal), "speak").unwrap(), Value::str("..."));
    }

    #[test]
    fn test_exact_overload_preferred_over_accept_any() {
        let d = dispatcher();
        let int = d.builtins().integer;
        let calc = d.graph().define_type("Calc", None, &[]).unwrap();
        define(
            &d,
            calc,
            "add",
            vec![
                NativeOverload::builder()
                    .required(int, ConversionStrategy::ExactOnly)
                    .required(int, ConversionStrategy::ExactOnly)
                    .build(|args| {
                        let sum = args.arg(0).as_int().unwrap_or(0) + args.arg(1).as_int().unwrap_or(0);
                        Ok(Value::Int(sum))
                    })
                    .unwrap(),
                NativeOverload::builder()
                    .any()
                    .any()
                    .build(|_| Ok(Value::str("generic")))
                    .unwrap(),
            ],
        );
        let receiver = Value::object(calc);

        let ints = [Value::Int(2), Value::Int(3)];
        let message = Message::new(&receiver, "add").args(&ints);
        assert_eq!(d.dispatch(&message).unwrap(), Value::Int(5));
        let resolved = d.resolve(&message).unwrap();
        assert_eq!((resolved.index, resolved.score), (0, 0));

        let mixed = [Value::str("2"), Value::Int(3)];
        let message = Message::new(&receiver, "add").args(&mixed);
        assert_eq!(d.dispatch(&message).unwrap(), Value::str("generic"));
        let resolved = d.resolve(&message).unwrap();
        assert_eq!((resolved.index, resolved.score), (1, 4));
    }

    #[test]
    fn test_missing_required_block_is_an_error() {
        let d = dispatcher();
        let list = d.graph().define_type("List", None, &[]).unwrap();
        define(
            &d,
            list,
            "each",
            vec![
                NativeOverload::builder()
                    .block(BlockRequirement::Required)
                    .build(|args| args.yield_block(&[Value::Int(1)]))
                    .unwrap(),
            ],
        );
        let receiver = Value::object(list);

        let err = send(&d, &receiver, "each").unwrap_err();
        assert!(matches!(err, DispatchError::BlockRequired(_)));

        let block = Block::new(|args| Ok(Value::Int(args[0].as_int().unwrap_or(0) * 10)));
        let message = Message::new(&receiver, "each").block(&block);
        assert_eq!(d.dispatch(&message).unwrap(), Value::Int(10));
    }

    #[test]
    fn test_call_site_misses_once_on_receiver_change() {
        let d = dispatcher();
        let animal = d.graph().define_type("Animal", None, &[]).unwrap();
        let dog = d.graph().define_type("Dog", Some(animal), &[]).unwrap();
        let cat = d.graph().define_type("Cat", Some(animal), &[]).unwrap();
        define(&d, dog, "speak", vec![says("woof")]);
        define(&d, cat, "speak", vec![says("meow")]);

        let site = CallSiteId::new(1, 8);
        let rex = Value::object(dog);
        let tom = Value::object(cat);

        for _ in 0..3 {
            assert_eq!(d.dispatch_at(site, &Message::new(&rex, "speak")).unwrap(), Value::str("woof"));
        }
        let cache = d.ic_manager().get(site).unwrap();
        assert_eq!(cache.stats(), (2, 1));

        // First send with the new receiver: one more miss, no new hit.
        assert_eq!(d.dispatch_at(site, &Message::new(&tom, "speak")).unwrap(), Value::str("meow"));
        assert_eq!(cache.stats(), (2, 2));

        for _ in 0..2 {
            assert_eq!(d.dispatch_at(site, &Message::new(&tom, "speak")).unwrap(), Value::str("meow"));
        }
        assert_eq!(cache.stats(), (4, 2));
        assert_eq!(d.ic_manager().classification(site), ICClassification::Bimorphic);
    }
}

// =============================================================================
// Cache Properties
// =============================================================================

mod properties {
    use super::*;

    #[test]
    fn test_lookup_is_idempotent() {
        let d = dispatcher();
        let animal = d.graph().define_type("Animal", None, &[]).unwrap();
        let dog = d.graph().define_type("Dog", Some(animal), &[]).unwrap();
        define(&d, animal, "speak", vec![says("...")]);

        let name = intern("speak");
        let first = d.method_cache().lookup(d.graph(), dog, name, LookupRoot::Instance).unwrap();
        let second = d.method_cache().lookup(d.graph(), dog, name, LookupRoot::Instance).unwrap();
        let uncached = d.graph().find_method(dog, name, LookupRoot::Instance).unwrap();

        assert!(Arc::ptr_eq(&first.entry, &second.entry));
        assert!(Arc::ptr_eq(&first.entry, &uncached.entry));
        assert_eq!(d.method_cache().stats().0, 1);
    }

    #[test]
    fn test_include_bundle_invalidates_cached_lookup() {
        let d = dispatcher();
        let animal = d.graph().define_type("Animal", None, &[]).unwrap();
        let dog = d.graph().define_type("Dog", Some(animal), &[]).unwrap();
        let loud = d.graph().define_bundle("Loud", &[]).unwrap();
        define(&d, animal, "foo", vec![says("animal")]);
        define(&d, loud, "foo", vec![says("loud")]);

        let site = CallSiteId::new(2, 0);
        let rex = Value::object(dog);
        assert_eq!(d.method_owner(dog, "foo"), Some(animal));
        assert_eq!(d.dispatch_at(site, &Message::new(&rex, "foo")).unwrap(), Value::str("animal"));

        assert!(d.graph().include_bundle(dog, loud).unwrap());
        assert_eq!(d.method_owner(dog, "foo"), Some(loud));
        assert_eq!(d.dispatch_at(site, &Message::new(&rex, "foo")).unwrap(), Value::str("loud"));

        // Including again changes nothing.
        assert!(!d.graph().include_bundle(dog, loud).unwrap());
    }

    #[test]
    fn test_new_method_on_ancestor_reaches_call_site() {
        let d = dispatcher();
        let base = d.graph().define_type("Base", None, &[]).unwrap();
        let mid = d.graph().define_type("Mid", Some(base), &[]).unwrap();
        let leaf = d.graph().define_type("Leaf", Some(mid), &[]).unwrap();
        define(&d, base, "name", vec![says("base")]);

        let site = CallSiteId::new(3, 0);
        let obj = Value::object(leaf);
        assert_eq!(d.dispatch_at(site, &Message::new(&obj, "name")).unwrap(), Value::str("base"));
        define(&d, mid, "name", vec![says("mid")]);
        assert_eq!(d.dispatch_at(site, &Message::new(&obj, "name")).unwrap(), Value::str("mid"));
    }

    #[test]
    fn test_resolution_independent_of_cache_state() {
        let build = |options: &[&str]| {
            let d = configured(options);
            let int = d.builtins().integer;
            let float = d.builtins().float;
            let calc = d.graph().define_type("Calc", None, &[]).unwrap();
            define(
                &d,
                calc,
                "f",
                vec![
                    NativeOverload::builder().any().build(|_| Ok(Value::str("any"))).unwrap(),
                    NativeOverload::builder()
                        .required(int, ConversionStrategy::ExactOnly)
                        .build(|_| Ok(Value::str("int")))
                        .unwrap(),
                    NativeOverload::builder()
                        .required(float, ConversionStrategy::ExactOnly)
                        .build(|_| Ok(Value::str("float")))
                        .unwrap(),
                ],
            );
            (d, calc)
        };

        let (cached, calc_a) = build(&[]);
        let (uncached, calc_b) = build(&["ic=off", "method_cache=off"]);
        let args = [Value::Int(1), Value::Float(1.5), Value::str("s"), Value::Int(2), Value::Nil];

        for (i, arg) in args.iter().enumerate() {
            let one = std::slice::from_ref(arg);
            let site = CallSiteId::new(4, 0);
            let a = Value::object(calc_a);
            let b = Value::object(calc_b);
            let x = cached.dispatch_at(site, &Message::new(&a, "f").args(one)).unwrap();
            let y = uncached.dispatch_at(site, &Message::new(&b, "f").args(one)).unwrap();
            let z = cached.dispatch(&Message::new(&a, "f").args(one)).unwrap();
            assert_eq!(x, y, "argument {}", i);
            assert_eq!(x, z, "argument {}", i);
        }
        assert_eq!(uncached.method_cache().len(), 0);
    }

    #[test]
    fn test_bundle_reached_twice_appears_once() {
        let d = dispatcher();
        let base = d.graph().define_bundle("Base", &[]).unwrap();
        let left = d.graph().define_bundle("Left", &[base]).unwrap();
        let right = d.graph().define_bundle("Right", &[base]).unwrap();
        let thing = d.graph().define_type("Thing", None, &[left, right]).unwrap();

        let mro = d.ancestors(thing);
        assert_eq!(mro[0], thing);
        assert_eq!(mro.iter().filter(|&&m| m == base).count(), 1);
        assert_eq!(mro.iter().filter(|&&m| m == thing).count(), 1);
        assert_eq!(*mro.last().unwrap(), ModuleId::ROOT);
    }
}

// =============================================================================
// Visibility and Lookup Roots
// =============================================================================

mod visibility {
    use super::*;

    #[test]
    fn test_module_function_is_private_on_instances_public_on_type() {
        let d = dispatcher();
        let float = d.builtins().float;
        let math = d.graph().define_bundle("Math", &[]).unwrap();
        let sqrt = NativeOverload::builder()
            .required(float, ConversionStrategy::ExactOnly)
            .build(|args| Ok(Value::Float(args.arg(0).as_float().unwrap_or(0.0).sqrt())))
            .unwrap();
        d.graph()
            .register_method(math, intern("sqrt"), Visibility::Public, DispatchKind::DualLevel, vec![sqrt])
            .unwrap();
        let calc = d.graph().define_type("Calc", None, &[math]).unwrap();

        let nine = [Value::Float(9.0)];
        let math_value = Value::Module(math);
        assert_eq!(
            d.dispatch(&Message::new(&math_value, "sqrt").args(&nine)).unwrap(),
            Value::Float(3.0)
        );

        let obj = Value::object(calc);
        assert!(matches!(
            d.dispatch(&Message::new(&obj, "sqrt").args(&nine)).unwrap_err(),
            DispatchError::PrivateMethod { .. }
        ));
        assert_eq!(
            d.dispatch(&Message::new(&obj, "sqrt").args(&nine).from_self()).unwrap(),
            Value::Float(3.0)
        );
        assert!(!d.responds_to(&obj, "sqrt", false));
        assert!(d.responds_to(&obj, "sqrt", true));
        assert!(d.responds_to(&math_value, "sqrt", false));
    }

    #[test]
    fn test_protected_requires_related_caller() {
        let d = dispatcher();
        let animal = d.graph().define_type("Animal", None, &[]).unwrap();
        let dog = d.graph().define_type("Dog", Some(animal), &[]).unwrap();
        let rock = d.graph().define_type("Rock", None, &[]).unwrap();
        d.graph()
            .register_method(animal, intern("age"), Visibility::Protected, DispatchKind::InstanceLevel, vec![says("3")])
            .unwrap();

        let rex = Value::object(dog);
        let from = |caller: Option<ModuleId>| Message::new(&rex, "age").caller(CallerContext::Explicit { caller });
        assert_eq!(d.dispatch(&from(Some(dog))).unwrap(), Value::str("3"));
        assert!(matches!(
            d.dispatch(&from(Some(rock))).unwrap_err(),
            DispatchError::ProtectedMethod { .. }
        ));
        assert!(matches!(
            d.dispatch(&from(None)).unwrap_err(),
            DispatchError::ProtectedMethod { .. }
        ));
    }

    #[test]
    fn test_visibility_checked_on_inline_cache_hits() {
        let d = dispatcher();
        let dog = d.graph().define_type("Dog", None, &[]).unwrap();
        d.graph()
            .register_method(dog, intern("secret"), Visibility::Private, DispatchKind::InstanceLevel, vec![says("s")])
            .unwrap();
        let site = CallSiteId::new(5, 0);
        let rex = Value::object(dog);

        assert!(d.dispatch_at(site, &Message::new(&rex, "secret").from_self()).is_ok());
        assert!(matches!(
            d.dispatch_at(site, &Message::new(&rex, "secret")).unwrap_err(),
            DispatchError::PrivateMethod { .. }
        ));
    }

    #[test]
    fn test_set_visibility_is_local_to_module() {
        let d = dispatcher();
        let animal = d.graph().define_type("Animal", None, &[]).unwrap();
        let dog = d.graph().define_type("Dog", Some(animal), &[]).unwrap();
        define(&d, animal, "speak", vec![says("...")]);
        d.graph().set_visibility(dog, intern("speak"), Visibility::Private).unwrap();

        assert!(send(&d, &Value::object(animal), "speak").is_ok());
        assert!(matches!(
            send(&d, &Value::object(dog), "speak").unwrap_err(),
            DispatchError::PrivateMethod { .. }
        ));
    }

    #[test]
    fn test_type_receivers_keyed_separately() {
        let d = dispatcher();
        let dog = d.graph().define_type("Dog", None, &[]).unwrap();
        let cat = d.graph().define_type("Cat", None, &[]).unwrap();
        for class in [dog, cat] {
            let new = NativeOverload::builder()
                .build(move |_| Ok(Value::object(class)))
                .unwrap();
            d.graph()
                .register_method(class, intern("new"), Visibility::Public, DispatchKind::TypeLevel, vec![new])
                .unwrap();
        }

        let site = CallSiteId::new(6, 0);
        let dog_type = Value::Module(dog);
        let cat_type = Value::Module(cat);
        let rex = d.dispatch_at(site, &Message::new(&dog_type, "new")).unwrap();
        let tom = d.dispatch_at(site, &Message::new(&cat_type, "new")).unwrap();
        assert_eq!(d.class_of(&rex), dog);
        assert_eq!(d.class_of(&tom), cat);

        // `new` is not an instance method.
        assert!(send(&d, &rex, "new").unwrap_err().is_unbound());
        assert_eq!(d.ic_manager().classification(site), ICClassification::Bimorphic);
    }

    #[test]
    fn test_type_receivers_fall_back_to_module_methods() {
        let d = dispatcher();
        let module = d.builtins().module;
        let dog = d.graph().define_type("Dog", None, &[]).unwrap();
        d.graph()
            .register_method(
                module,
                intern("name"),
                Visibility::Public,
                DispatchKind::InstanceLevel,
                vec![
                    NativeOverload::builder()
                        .implicit(ImplicitSlot::Context)
                        .build(|args| {
                            let (Some(ctx), Some(id)) = (args.context, args.receiver.as_module()) else {
                                return Ok(Value::Nil);
                            };
                            Ok(Value::str(&ctx.graph().display_name(id).as_str()))
                        })
                        .unwrap(),
                ],
            )
            .unwrap();

        let site = CallSiteId::new(7, 0);
        let dog_type = Value::Module(dog);
        assert_eq!(d.dispatch_at(site, &Message::new(&dog_type, "name")).unwrap(), Value::str("Dog"));

        // A type-level definition on Dog now shadows the fallback.
        d.graph()
            .register_method(dog, intern("name"), Visibility::Public, DispatchKind::TypeLevel, vec![says("custom")])
            .unwrap();
        assert_eq!(d.dispatch_at(site, &Message::new(&dog_type, "name")).unwrap(), Value::str("custom"));
    }
}

// =============================================================================
// Table Edits
// =============================================================================

mod table_edits {
    use super::*;

    #[test]
    fn test_undefine_then_remove() {
        let d = dispatcher();
        let animal = d.graph().define_type("Animal", None, &[]).unwrap();
        let dog = d.graph().define_type("Dog", Some(animal), &[]).unwrap();
        let puppy = d.graph().define_type("Puppy", Some(dog), &[]).unwrap();
        define(&d, animal, "dup", vec![says("copy")]);

        d.graph().undefine_method(dog, intern("dup")).unwrap();
        assert!(send(&d, &Value::object(dog), "dup").unwrap_err().is_unbound());
        assert!(send(&d, &Value::object(puppy), "dup").unwrap_err().is_unbound());
        assert!(send(&d, &Value::object(animal), "dup").is_ok());

        assert!(d.graph().remove_method(dog, intern("dup")).unwrap());
        assert_eq!(send(&d, &Value::object(puppy), "dup").unwrap(), Value::str("copy"));
    }

    #[test]
    fn test_alias_shares_entry() {
        let d = dispatcher();
        let dog = d.graph().define_type("Dog", None, &[]).unwrap();
        define(&d, dog, "speak", vec![says("woof")]);
        d.graph().alias_method(dog, intern("bark"), intern("speak")).unwrap();

        let rex = Value::object(dog);
        assert_eq!(send(&d, &rex, "bark").unwrap(), Value::str("woof"));
        let speak = d.overloads(dog, "speak");
        let bark = d.overloads(dog, "bark");
        assert!(Arc::ptr_eq(&speak[0], &bark[0]));

        // Redefining the original leaves the alias alone.
        d.graph()
            .register_method(dog, intern("speak"), Visibility::Public, DispatchKind::TypeLevel, vec![says("x")])
            .unwrap();
        assert_eq!(send(&d, &rex, "bark").unwrap(), Value::str("woof"));
    }

    #[test]
    fn test_super_skips_current_owner() {
        let d = dispatcher();
        let animal = d.graph().define_type("Animal", None, &[]).unwrap();
        let loud = d.graph().define_bundle("Loud", &[]).unwrap();
        let dog = d.graph().define_type("Dog", Some(animal), &[loud]).unwrap();
        define(&d, animal, "speak", vec![says("animal")]);
        define(&d, loud, "speak", vec![says("loud")]);
        define(&d, dog, "speak", vec![says("dog")]);

        let rex = Value::object(dog);
        let message = Message::new(&rex, "speak");
        assert_eq!(d.dispatch(&message).unwrap(), Value::str("dog"));
        assert_eq!(d.dispatch_super(&message, dog).unwrap(), Value::str("loud"));
        assert_eq!(d.dispatch_super(&message, loud).unwrap(), Value::str("animal"));
        assert!(d.dispatch_super(&message, animal).unwrap_err().is_unbound());
    }

    #[test]
    fn test_reregistration_appends_overloads() {
        let d = dispatcher();
        let int = d.builtins().integer;
        let calc = d.graph().define_type("Calc", None, &[]).unwrap();
        define(&d, calc, "f", vec![says("nullary")]);
        define(
            &d,
            calc,
            "f",
            vec![
                NativeOverload::builder()
                    .required(int, ConversionStrategy::ExactOnly)
                    .build(|_| Ok(Value::str("unary")))
                    .unwrap(),
            ],
        );

        let obj = Value::object(calc);
        let one = [Value::Int(1)];
        assert_eq!(send(&d, &obj, "f").unwrap(), Value::str("nullary"));
        assert_eq!(d.dispatch(&Message::new(&obj, "f").args(&one)).unwrap(), Value::str("unary"));
        assert_eq!(d.overload_signatures(calc, "f"), vec!["()", "(Integer)"]);
    }
}

// =============================================================================
// Arguments
// =============================================================================

mod arguments {
    use super::*;

    #[test]
    fn test_options_bag_absorbed_by_trailing_slot() {
        let d = dispatcher();
        let string = d.builtins().string;
        let hash = d.builtins().hash;
        let io = d.graph().define_type("IO", None, &[]).unwrap();
        define(
            &d,
            io,
            "open",
            vec![
                NativeOverload::builder()
                    .required(string, ConversionStrategy::ExactOnly)
                    .options(hash)
                    .build(|args| Ok(Value::Int(args.args.len() as i64)))
                    .unwrap(),
            ],
        );

        let obj = Value::object(io);
        let path = [Value::str("/tmp/x")];
        let options = Value::hash(vec![(Value::str("mode"), Value::str("r"))]);
        let with_bag = Message::new(&obj, "open").args(&path).options(&options);
        assert_eq!(d.dispatch(&with_bag).unwrap(), Value::Int(2));
        assert_eq!(d.dispatch(&Message::new(&obj, "open").args(&path)).unwrap(), Value::Int(1));

        let too_many = [Value::str("/tmp/x"), Value::str("extra")];
        assert!(matches!(
            d.dispatch(&Message::new(&obj, "open").args(&too_many).options(&options)).unwrap_err(),
            DispatchError::ArgumentCountMismatch(_)
        ));
    }

    #[test]
    fn test_options_bag_skips_omitted_optional() {
        let d = dispatcher();
        let string = d.builtins().string;
        let int = d.builtins().integer;
        let hash = d.builtins().hash;
        let io = d.graph().define_type("IO", None, &[]).unwrap();
        define(
            &d,
            io,
            "open",
            vec![
                NativeOverload::builder()
                    .required(string, ConversionStrategy::ExactOnly)
                    .optional(int, ConversionStrategy::ExactOnly)
                    .options(hash)
                    .build(|args| Ok(Value::array(args.args.to_vec())))
                    .unwrap(),
            ],
        );

        let obj = Value::object(io);
        let options = Value::hash(vec![(Value::str("mode"), Value::str("r"))]);
        let path = [Value::str("a")];
        assert_eq!(
            d.dispatch(&Message::new(&obj, "open").args(&path).options(&options)).unwrap(),
            Value::array(vec![Value::str("a"), Value::Nil, options.clone()])
        );

        let path_and_flags = [Value::str("a"), Value::Int(7)];
        assert_eq!(
            d.dispatch(&Message::new(&obj, "open").args(&path_and_flags).options(&options)).unwrap(),
            Value::array(vec![Value::str("a"), Value::Int(7), options.clone()])
        );

        // Same through a call site, where the placement is replayed from the cache.
        let site = CallSiteId::new(11, 0);
        for _ in 0..2 {
            assert_eq!(
                d.dispatch_at(site, &Message::new(&obj, "open").args(&path).options(&options)).unwrap(),
                Value::array(vec![Value::str("a"), Value::Nil, options.clone()])
            );
        }
        assert_eq!(d.ic_manager().get(site).unwrap().stats(), (1, 1));
    }

    #[test]
    fn test_converter_registration_retargets_cached_call_site() {
        let d = dispatcher();
        let int = d.builtins().integer;
        let float = d.builtins().float;
        let num = d.graph().define_type("Num", None, &[]).unwrap();
        define(
            &d,
            num,
            "scale",
            vec![
                NativeOverload::builder().any().build(|_| Ok(Value::str("any"))).unwrap(),
                NativeOverload::builder()
                    .required(float, ConversionStrategy::ImplicitConvert)
                    .build(|args| Ok(Value::Float(args.arg(0).as_float().unwrap_or(f64::NAN) * 2.0)))
                    .unwrap(),
            ],
        );

        let site = CallSiteId::new(8, 0);
        let obj = Value::object(num);
        let three = [Value::Int(3)];
        let message = Message::new(&obj, "scale").args(&three);
        assert_eq!(d.dispatch_at(site, &message).unwrap(), Value::str("any"));
        assert_eq!(d.dispatch_at(site, &message).unwrap(), Value::str("any"));

        d.register_converter(int, float, |v| {
            v.as_int()
                .map(|i| Value::Float(i as f64))
                .ok_or(mosaic_core::ConvertError::NotApplicable)
        });
        assert_eq!(d.dispatch_at(site, &message).unwrap(), Value::Float(6.0));
        assert_eq!(d.resolve(&message).unwrap().plan.conversions(), 1);
    }

    #[test]
    fn test_strict_block_policy() {
        let d = configured(&["blocks=strict"]);
        let dog = d.graph().define_type("Dog", None, &[]).unwrap();
        define(&d, dog, "speak", vec![says("woof")]);
        let rex = Value::object(dog);
        let block = Block::new(|_| Ok(Value::Nil));

        assert!(matches!(
            d.dispatch(&Message::new(&rex, "speak").block(&block)).unwrap_err(),
            DispatchError::UnexpectedBlock(_)
        ));
        assert!(send(&d, &rex, "speak").is_ok());

        let lenient = dispatcher();
        let dog = lenient.graph().define_type("Dog", None, &[]).unwrap();
        define(&lenient, dog, "speak", vec![says("woof")]);
        let rex = Value::object(dog);
        assert_eq!(
            lenient.dispatch(&Message::new(&rex, "speak").block(&block)).unwrap(),
            Value::str("woof")
        );
    }
}

// =============================================================================
// Implicit Slots
// =============================================================================

mod implicit_slots {
    use super::*;

    #[test]
    fn test_context_slot_allows_nested_sends() {
        let d = dispatcher();
        let dog = d.graph().define_type("Dog", None, &[]).unwrap();
        let vet = d.graph().define_type("Vet", None, &[]).unwrap();
        define(&d, dog, "legs", vec![NativeOverload::builder().build(|_| Ok(Value::Int(4))).unwrap()]);
        define(
            &d,
            vet,
            "count_legs",
            vec![
                NativeOverload::builder()
                    .implicit(ImplicitSlot::Context)
                    .any()
                    .build(|args| match args.context {
                        Some(ctx) => ctx.send(args.arg(0), intern("legs"), &[]),
                        None => Ok(Value::Nil),
                    })
                    .unwrap(),
            ],
        );

        let patient = [Value::object(dog)];
        let doctor = Value::object(vet);
        let message = Message::new(&doctor, "count_legs").args(&patient);
        assert_eq!(d.dispatch(&message).unwrap(), Value::Int(4));

        // The implicit slot is not part of the caller-visible arity.
        assert!(matches!(
            d.dispatch(&Message::new(&doctor, "count_legs")).unwrap_err(),
            DispatchError::ArgumentCountMismatch(_)
        ));

        // Nested failures surface as native errors.
        let stone = [Value::Int(1)];
        assert!(matches!(
            d.dispatch(&Message::new(&doctor, "count_legs").args(&stone)).unwrap_err(),
            DispatchError::Native(_)
        ));
    }

    #[test]
    fn test_site_storage_is_per_call_site() {
        let d = dispatcher();
        let memo = d.graph().define_type("Memo", None, &[]).unwrap();
        define(
            &d,
            memo,
            "first",
            vec![
                NativeOverload::builder()
                    .any()
                    .implicit(ImplicitSlot::SiteStorage)
                    .build(|args| match args.storage {
                        Some(storage) => Ok(storage.get_or_insert_with(intern("first"), || args.arg(0).clone())),
                        None => Ok(Value::Nil),
                    })
                    .unwrap(),
            ],
        );

        let obj = Value::object(memo);
        let call = |site: CallSiteId, n: i64| {
            let arg = [Value::Int(n)];
            d.dispatch_at(site, &Message::new(&obj, "first").args(&arg)).unwrap()
        };
        let a = CallSiteId::new(9, 0);
        let b = CallSiteId::new(9, 4);
        assert_eq!(call(a, 1), Value::Int(1));
        assert_eq!(call(a, 2), Value::Int(1));
        assert_eq!(call(b, 3), Value::Int(3));
        assert_eq!(d.ic_manager().get(a).unwrap().storage().len(), 1);
    }
}

// =============================================================================
// Megamorphic Sites
// =============================================================================

mod megamorphic {
    use super::*;

    #[test]
    fn test_site_goes_megamorphic_and_stays_correct() {
        let d = configured(&["ic_entries=2"]);
        let names = ["A", "B", "C", "D"];
        let classes: Vec<ModuleId> = names
            .iter()
            .map(|name| {
                let id = d.graph().define_type(name, None, &[]).unwrap();
                define(&d, id, "tag", vec![says(*name)]);
                id
            })
            .collect();

        let site = CallSiteId::new(10, 0);
        for round in 0..2 {
            for (class, name) in classes.iter().zip(names) {
                let obj = Value::object(*class);
                assert_eq!(
                    d.dispatch_at(site, &Message::new(&obj, "tag")).unwrap(),
                    Value::str(name),
                    "round {}",
                    round
                );
            }
        }
        assert_eq!(d.ic_manager().classification(site), ICClassification::Megamorphic);
        assert_eq!(d.ic_manager().classification_breakdown().megamorphic, 1);
    }
}

// =============================================================================
// Concurrent Mutation
// =============================================================================

mod concurrency {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    const READERS: usize = 4;

    /// Readers hammer one shared site while `mutate` runs on another thread.
    ///
    /// Every send must answer with `before` or `after`; once a reader sees the
    /// writer has returned, every later send must answer with `after`.
    fn race(d: &Dispatcher, receiver: &Value, before: &str, after: &str, mutate: impl FnOnce() + Send) {
        let site = CallSiteId::new(40, 0);
        let done = AtomicBool::new(false);
        let before = Value::str(before);
        let after = Value::str(after);

        std::thread::scope(|scope| {
            for _ in 0..READERS {
                scope.spawn(|| {
                    let message = Message::new(receiver, "speak");
                    loop {
                        let finished = done.load(Ordering::Acquire);
                        let result = d.dispatch_at(site, &message).unwrap();
                        if finished {
                            assert_eq!(result, after);
                            break;
                        }
                        assert!(result == before || result == after, "unexpected {:?}", result);
                    }
                    for _ in 0..16 {
                        assert_eq!(d.dispatch_at(site, &message).unwrap(), after);
                    }
                });
            }

            scope.spawn(|| {
                // Let the readers warm the site first.
                std::thread::yield_now();
                mutate();
                done.store(true, Ordering::Release);
            });
        });

        assert_eq!(d.dispatch_at(site, &Message::new(receiver, "speak")).unwrap(), after);
    }

    #[test]
    fn test_register_method_during_dispatch() {
        for _ in 0..8 {
            let d = dispatcher();
            let animal = d.graph().define_type("Animal", None, &[]).unwrap();
            let dog = d.graph().define_type("Dog", Some(animal), &[]).unwrap();
            define(&d, animal, "speak", vec![says("animal")]);
            let rex = Value::object(dog);

            race(&d, &rex, "animal", "dog", || define(&d, dog, "speak", vec![says("dog")]));
        }
    }

    #[test]
    fn test_include_bundle_during_dispatch() {
        for _ in 0..8 {
            let d = dispatcher();
            let animal = d.graph().define_type("Animal", None, &[]).unwrap();
            let dog = d.graph().define_type("Dog", Some(animal), &[]).unwrap();
            let loud = d.graph().define_bundle("Loud", &[]).unwrap();
            define(&d, animal, "speak", vec![says("animal")]);
            define(&d, loud, "speak", vec![says("LOUD")]);
            let rex = Value::object(dog);

            race(&d, &rex, "animal", "LOUD", || {
                assert!(d.graph().include_bundle(dog, loud).unwrap());
            });
        }
    }
}

// =============================================================================
// Manifests
// =============================================================================

mod manifests {
    use super::*;

    #[test]
    fn test_manifest_loads_into_dispatcher() {
        let d = dispatcher();
        let manifest = Manifest::new()
            .bundle("Loud", &[])
            .class("Animal", None, &[])
            .class("Dog", Some("Animal"), &["Loud"])
            .method(
                "Loud",
                "speak",
                Visibility::Public,
                DispatchKind::InstanceLevel,
                vec![OverloadDecl::new(Arc::new(|_| Ok(Value::str("WOOF"))))],
            )
            .method(
                "Animal",
                "feed",
                Visibility::Public,
                DispatchKind::InstanceLevel,
                vec![OverloadDecl::new(Arc::new(|args| Ok(args.arg(0).clone()))).required("Integer", ConversionStrategy::ImplicitConvert)],
            )
            .converter("Float", "Integer", |v| {
                v.as_float()
                    .map(|f| Value::Int(f as i64))
                    .ok_or(mosaic_core::ConvertError::NotApplicable)
            });
        assert_eq!(d.load_manifest(&manifest).unwrap(), manifest.len());

        let dog = d.graph().find("Dog").unwrap();
        let rex = Value::object(dog);
        assert_eq!(send(&d, &rex, "speak").unwrap(), Value::str("WOOF"));
        let food = [Value::Float(2.7)];
        assert_eq!(d.dispatch(&Message::new(&rex, "feed").args(&food)).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_failed_manifest_leaves_nothing_behind() {
        let d = dispatcher();
        let before = d.graph().len();
        let manifest = Manifest::new()
            .class("Cat", None, &[])
            .class("Lion", Some("BigCat"), &[]);

        assert!(d.load_manifest(&manifest).is_err());
        assert_eq!(d.graph().len(), before);
        assert!(d.graph().find("Cat").is_none());
    }
}
